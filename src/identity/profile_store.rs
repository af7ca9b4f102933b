use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::principal::Profile;
use super::role::Role;
use crate::error::{PortalError, PortalResult};

/// Surface of the external profile store. The storage technology behind it is
/// not our concern.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Every record held for `identity_id`, across role collections. An empty result
    /// is not an error.
    async fn find_profiles(&self, identity_id: &str) -> PortalResult<Vec<Profile>>;
}

/// Role collections kept in memory: role -> identity id -> records.
#[derive(Default)]
pub struct MemoryProfileStore {
    collections: RwLock<BTreeMap<Role, BTreeMap<String, Vec<Profile>>>>,
    unavailable: AtomicBool,
    lookups: AtomicUsize,
}

impl MemoryProfileStore {
    pub fn new() -> Self { Self::default() }

    pub fn from_profiles<I: IntoIterator<Item = Profile>>(profiles: I) -> Self {
        let store = Self::default();
        for p in profiles { store.insert(p); }
        store
    }

    /// Load fixtures from a JSON array of profile records.
    pub fn from_json_file(path: &Path) -> PortalResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PortalError::config("profiles_file".to_string(), format!("cannot read {}: {}", path.display(), e))
        })?;
        let profiles: Vec<Profile> = serde_json::from_str(&text)?;
        Ok(Self::from_profiles(profiles))
    }

    pub fn insert(&self, profile: Profile) {
        self.collections
            .write()
            .entry(profile.role)
            .or_default()
            .entry(profile.identity_id.clone())
            .or_default()
            .push(profile);
    }

    pub fn len(&self) -> usize {
        self.collections.read().values().flat_map(|c| c.values()).map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn set_available(&self, up: bool) { self.unavailable.store(!up, Ordering::SeqCst); }

    /// Number of lookups served (including failed ones).
    pub fn lookup_count(&self) -> usize { self.lookups.load(Ordering::SeqCst) }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn find_profiles(&self, identity_id: &str) -> PortalResult<Vec<Profile>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PortalError::store_unavailable("profile store unreachable"));
        }
        let colls = self.collections.read();
        let out = colls
            .values()
            .filter_map(|coll| coll.get(identity_id))
            .flat_map(|v| v.iter().cloned())
            .collect();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn finds_across_collections() {
        let store = MemoryProfileStore::from_profiles(vec![
            Profile::new("u1", Role::Teacher, "Mme Durand"),
            Profile::new("u1", Role::Tutor, "Mme Durand"),
            Profile::new("u2", Role::Student, "Léa Martin"),
        ]);
        assert_eq!(store.len(), 3);
        let roles: Vec<Role> = store.find_profiles("u1").await.unwrap().iter().map(|p| p.role).collect();
        assert_eq!(roles.len(), 2);
        assert!(roles.contains(&Role::Teacher) && roles.contains(&Role::Tutor));
        assert!(store.find_profiles("ghost").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn outage_is_reported_and_counted() {
        let store = MemoryProfileStore::from_profiles(vec![Profile::new("u1", Role::Student, "A")]);
        store.set_available(false);
        let err = store.find_profiles("u1").await.unwrap_err();
        assert!(err.is_transient());
        store.set_available(true);
        assert_eq!(store.find_profiles("u1").await.unwrap().len(), 1);
        assert_eq!(store.lookup_count(), 2);
    }

    #[test]
    fn loads_json_fixtures() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles.json");
        std::fs::write(
            &path,
            r#"[{"identity_id":"e1","role":"enterprise","display_name":"Acme","fields":{"siret":"123"}},
                {"identity_id":"s1","role":"student","display_name":"Paul","active":false}]"#,
        )
        .unwrap();
        let store = MemoryProfileStore::from_json_file(&path).unwrap();
        assert_eq!(store.len(), 2);
        assert!(!store.is_empty());
    }
}
