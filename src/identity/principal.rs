use serde::{Deserialize, Serialize};

use super::role::Role;

/// Opaque handle issued by the identity provider for a signed-in visitor.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Identity {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

impl Identity {
    pub fn new<S: Into<String>>(id: S) -> Self { Self { id: id.into(), email: None } }

    pub fn with_email<S: Into<String>>(mut self, email: S) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// Role-specific record held by the profile store. Fields beyond name and status vary
/// per collection (student number, company SIRET, department...) and are carried as-is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    pub identity_id: String,
    pub role: Role,
    pub display_name: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

fn default_active() -> bool { true }

impl Profile {
    pub fn new<S: Into<String>>(identity_id: S, role: Role, display_name: S) -> Self {
        Self {
            identity_id: identity_id.into(),
            role,
            display_name: display_name.into(),
            active: true,
            fields: serde_json::Map::new(),
        }
    }

    pub fn with_field<K: Into<String>>(mut self, key: K, value: serde_json::Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }
}
