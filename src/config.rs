//! Environment-driven configuration for the `stagegate` binary.
//!
//! | variable                        | default  |
//! |---------------------------------|----------|
//! | `STAGEGATE_HTTP_PORT`           | 7880     |
//! | `STAGEGATE_ROUTES_FILE`         | built-in |
//! | `STAGEGATE_PROFILES_FILE`       | empty    |
//! | `STAGEGATE_RESOLVE_ATTEMPTS`    | 3        |
//! | `STAGEGATE_RESOLVE_BACKOFF_MS`  | 200      |
//!
//! The backoff may not exceed 30000 ms.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{PortalError, PortalResult};
use crate::identity::{MemoryProfileStore, RetryPolicy, MAX_BACKOFF};
use crate::routing::RouteTable;

pub const ENV_HTTP_PORT: &str = "STAGEGATE_HTTP_PORT";
pub const ENV_ROUTES_FILE: &str = "STAGEGATE_ROUTES_FILE";
pub const ENV_PROFILES_FILE: &str = "STAGEGATE_PROFILES_FILE";
pub const ENV_RESOLVE_ATTEMPTS: &str = "STAGEGATE_RESOLVE_ATTEMPTS";
pub const ENV_RESOLVE_BACKOFF_MS: &str = "STAGEGATE_RESOLVE_BACKOFF_MS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalConfig {
    pub http_port: u16,
    pub routes_file: Option<PathBuf>,
    pub profiles_file: Option<PathBuf>,
    pub resolve_attempts: u32,
    pub resolve_backoff: Duration,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            http_port: 7880,
            routes_file: None,
            profiles_file: None,
            resolve_attempts: 3,
            resolve_backoff: Duration::from_millis(200),
        }
    }
}

fn parse_var<T: FromStr>(name: &str, raw: &str) -> PortalResult<T> {
    raw.trim().parse::<T>().map_err(|_| {
        PortalError::config("invalid_env".to_string(), format!("{}='{}' is not a valid value", name, raw))
    })
}

impl PortalConfig {
    pub fn from_env() -> PortalResult<Self> { Self::from_lookup(|k| std::env::var(k).ok()) }

    /// Build from any key lookup; unset or blank keys keep their default.
    pub fn from_lookup<F>(get: F) -> PortalResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |k: &str| get(k).filter(|v| !v.trim().is_empty());
        let mut cfg = Self::default();
        if let Some(v) = var(ENV_HTTP_PORT) { cfg.http_port = parse_var(ENV_HTTP_PORT, &v)?; }
        if let Some(v) = var(ENV_ROUTES_FILE) { cfg.routes_file = Some(PathBuf::from(v)); }
        if let Some(v) = var(ENV_PROFILES_FILE) { cfg.profiles_file = Some(PathBuf::from(v)); }
        if let Some(v) = var(ENV_RESOLVE_ATTEMPTS) {
            let n: u32 = parse_var(ENV_RESOLVE_ATTEMPTS, &v)?;
            if n == 0 {
                return Err(PortalError::config(
                    "invalid_env".to_string(),
                    format!("{} must be at least 1", ENV_RESOLVE_ATTEMPTS),
                ));
            }
            cfg.resolve_attempts = n;
        }
        if let Some(v) = var(ENV_RESOLVE_BACKOFF_MS) {
            let backoff = Duration::from_millis(parse_var(ENV_RESOLVE_BACKOFF_MS, &v)?);
            if backoff > MAX_BACKOFF {
                return Err(PortalError::config(
                    "invalid_env".to_string(),
                    format!("{} must be at most {}", ENV_RESOLVE_BACKOFF_MS, MAX_BACKOFF.as_millis()),
                ));
            }
            cfg.resolve_backoff = backoff;
        }
        Ok(cfg)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy { attempts: self.resolve_attempts, backoff: self.resolve_backoff }
    }

    /// Route table from the configured file, or the built-in one. Either way it is
    /// validated before use.
    pub fn load_route_table(&self) -> PortalResult<RouteTable> {
        match &self.routes_file {
            Some(p) => RouteTable::from_json_file(p),
            None => {
                let t = RouteTable::builtin();
                t.validate()?;
                Ok(t)
            }
        }
    }

    pub fn load_profile_store(&self) -> PortalResult<MemoryProfileStore> {
        match &self.profiles_file {
            Some(p) => MemoryProfileStore::from_json_file(p),
            None => Ok(MemoryProfileStore::new()),
        }
    }
}
