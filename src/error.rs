//! Portal error model.
//! Resolution failures are absorbed by the session layer and only surface as a role
//! plus a diagnostic; the variants here are what the lower layers (identity provider,
//! profile store, route table, config) report upward, and what the HTTP surface maps.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PortalError {
    #[error("{code}: {message}")]
    IdentityUnavailable { code: String, message: String },
    #[error("{code}: {message}")]
    ProfileNotFound { code: String, message: String },
    #[error("{code}: {message}")]
    ProfileStoreUnavailable { code: String, message: String },
    #[error("{code}: {message}")]
    RoleAmbiguous { code: String, message: String },
    #[error("{code}: {message}")]
    Config { code: String, message: String },
    #[error("{code}: {message}")]
    InvalidRouteTable { code: String, message: String },
    #[error("{code}: {message}")]
    Internal { code: String, message: String },
}

impl PortalError {
    pub fn code_str(&self) -> &str {
        match self {
            PortalError::IdentityUnavailable { code, .. }
            | PortalError::ProfileNotFound { code, .. }
            | PortalError::ProfileStoreUnavailable { code, .. }
            | PortalError::RoleAmbiguous { code, .. }
            | PortalError::Config { code, .. }
            | PortalError::InvalidRouteTable { code, .. }
            | PortalError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            PortalError::IdentityUnavailable { message, .. }
            | PortalError::ProfileNotFound { message, .. }
            | PortalError::ProfileStoreUnavailable { message, .. }
            | PortalError::RoleAmbiguous { message, .. }
            | PortalError::Config { message, .. }
            | PortalError::InvalidRouteTable { message, .. }
            | PortalError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn identity_unavailable<S: Into<String>>(msg: S) -> Self {
        PortalError::IdentityUnavailable { code: "identity_unavailable".into(), message: msg.into() }
    }
    pub fn profile_not_found<S: Into<String>>(msg: S) -> Self {
        PortalError::ProfileNotFound { code: "profile_not_found".into(), message: msg.into() }
    }
    pub fn store_unavailable<S: Into<String>>(msg: S) -> Self {
        PortalError::ProfileStoreUnavailable { code: "profile_store_unavailable".into(), message: msg.into() }
    }
    pub fn role_ambiguous<S: Into<String>>(msg: S) -> Self {
        PortalError::RoleAmbiguous { code: "role_ambiguous".into(), message: msg.into() }
    }
    pub fn config<S: Into<String>>(code: S, msg: S) -> Self {
        PortalError::Config { code: code.into(), message: msg.into() }
    }
    pub fn route_table<S: Into<String>>(code: S, msg: S) -> Self {
        PortalError::InvalidRouteTable { code: code.into(), message: msg.into() }
    }
    pub fn internal<S: Into<String>>(code: S, msg: S) -> Self {
        PortalError::Internal { code: code.into(), message: msg.into() }
    }

    /// True for outages the caller may retry; these must never be read as a denial
    /// or a grant.
    pub fn is_transient(&self) -> bool {
        matches!(self, PortalError::IdentityUnavailable { .. } | PortalError::ProfileStoreUnavailable { .. })
    }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            PortalError::IdentityUnavailable { .. } => 503,
            PortalError::ProfileStoreUnavailable { .. } => 503,
            PortalError::ProfileNotFound { .. } => 403,
            PortalError::RoleAmbiguous { .. } => 403,
            PortalError::Config { .. } => 500,
            PortalError::InvalidRouteTable { .. } => 500,
            PortalError::Internal { .. } => 500,
        }
    }
}

pub type PortalResult<T> = Result<T, PortalError>;

impl From<anyhow::Error> for PortalError {
    fn from(err: anyhow::Error) -> Self {
        PortalError::Internal { code: "internal_error".into(), message: err.to_string() }
    }
}

impl From<serde_json::Error> for PortalError {
    fn from(err: serde_json::Error) -> Self {
        PortalError::Config { code: "invalid_json".into(), message: err.to_string() }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod error_tests;
