use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use super::principal::{Identity, Profile};
use super::profile_store::ProfileStore;
use super::role::SessionRole;
use crate::error::{PortalError, PortalResult};

/// Outcome of a successful lookup: the role the identity acts under and the record it
/// came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub role: SessionRole,
    pub profile: Option<Profile>,
}

impl Resolution {
    pub fn unknown() -> Self { Self { role: SessionRole::Unknown, profile: None } }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self { Self { attempts: 3, backoff: Duration::from_millis(200) } }
}

/// Longest pause between two lookups, whatever the policy says.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

impl RetryPolicy {
    pub fn no_retry() -> Self { Self { attempts: 1, backoff: Duration::ZERO } }

    /// Pause after failed attempt `attempt` (1-based): linear, capped at `MAX_BACKOFF`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff.checked_mul(attempt).map_or(MAX_BACKOFF, |d| d.min(MAX_BACKOFF))
    }
}

/// Pick the winning record among all candidates for one identity using the fixed role
/// precedence. Two records in the winning collection cannot be told apart.
pub fn pick_by_precedence(identity_id: &str, mut candidates: Vec<Profile>) -> PortalResult<Profile> {
    if candidates.is_empty() {
        return Err(PortalError::profile_not_found(format!("no profile for identity '{}'", identity_id)));
    }
    candidates.sort_by_key(|p| p.role.precedence());
    let top = candidates[0].role;
    let tied = candidates.iter().take_while(|p| p.role == top).count();
    if tied > 1 {
        return Err(PortalError::role_ambiguous(format!(
            "{} '{}' records for identity '{}'",
            tied, top, identity_id
        )));
    }
    Ok(candidates.swap_remove(0))
}

/// Maps an identity to `{role, profile}`. Results are cached per identity id until
/// `forget` is called, so repeated calls within a session agree.
pub struct RoleResolver {
    store: Arc<dyn ProfileStore>,
    policy: RetryPolicy,
    cache: Mutex<HashMap<String, PortalResult<Resolution>>>,
}

impl RoleResolver {
    pub fn new(store: Arc<dyn ProfileStore>, policy: RetryPolicy) -> Self {
        Self { store, policy, cache: Mutex::new(HashMap::new()) }
    }

    /// Resolve the identity's role.
    ///
    /// Errors:
    /// - `ProfileNotFound` / `RoleAmbiguous`: final for this identity, cached.
    /// - `ProfileStoreUnavailable`: the store stayed unreachable for every attempt.
    ///   Not cached, the next call tries again.
    pub async fn resolve(&self, identity: &Identity) -> PortalResult<Resolution> {
        let cached = self.cache.lock().get(&identity.id).cloned();
        if let Some(hit) = cached {
            debug!(target: "stagegate::resolver", "resolver.cache_hit id={}", identity.id);
            return hit;
        }

        let attempts = self.policy.attempts.max(1);
        let mut attempt = 1;
        let outcome = loop {
            match self.store.find_profiles(&identity.id).await {
                Ok(candidates) => {
                    break pick_by_precedence(&identity.id, candidates).map(|p| Resolution {
                        role: SessionRole::Known(p.role),
                        profile: Some(p),
                    });
                }
                Err(e) if e.is_transient() && attempt < attempts => {
                    warn!(
                        target: "stagegate::resolver",
                        "resolver.retry id={} attempt={}/{} err={}",
                        identity.id, attempt, attempts, e
                    );
                    tokio::time::sleep(self.policy.delay_after(attempt)).await;
                    attempt += 1;
                }
                Err(e) => break Err(e),
            }
        };

        match &outcome {
            Err(e) if e.is_transient() => {}
            _ => {
                self.cache.lock().insert(identity.id.clone(), outcome.clone());
            }
        }
        debug!(
            target: "stagegate::resolver",
            "resolver.resolved id={} role={:?}",
            identity.id,
            outcome.as_ref().map(|r| r.role.as_str()).map_err(|e| e.code_str().to_string())
        );
        outcome
    }

    /// Drop the cached result for an identity that has left the session.
    pub fn forget(&self, identity_id: &str) { self.cache.lock().remove(identity_id); }

    pub fn cached(&self, identity_id: &str) -> bool { self.cache.lock().contains_key(identity_id) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{MemoryProfileStore, Role};

    fn resolver(store: Arc<MemoryProfileStore>) -> RoleResolver {
        RoleResolver::new(store, RetryPolicy { attempts: 2, backoff: Duration::from_millis(1) })
    }

    #[test]
    fn precedence_picks_highest_collection() {
        let p = pick_by_precedence(
            "u1",
            vec![
                Profile::new("u1", Role::Student, "x"),
                Profile::new("u1", Role::Responsible, "x"),
                Profile::new("u1", Role::Teacher, "x"),
            ],
        )
        .unwrap();
        assert_eq!(p.role, Role::Responsible);
    }

    #[test]
    fn tie_in_winning_collection_is_ambiguous() {
        let err = pick_by_precedence(
            "u1",
            vec![
                Profile::new("u1", Role::Tutor, "a"),
                Profile::new("u1", Role::Tutor, "b"),
                Profile::new("u1", Role::Student, "c"),
            ],
        )
        .unwrap_err();
        assert_eq!(err.code_str(), "role_ambiguous");
        // a tie below the winner does not matter
        let ok = pick_by_precedence(
            "u1",
            vec![
                Profile::new("u1", Role::Admin, "a"),
                Profile::new("u1", Role::Student, "b"),
                Profile::new("u1", Role::Student, "c"),
            ],
        );
        assert_eq!(ok.unwrap().role, Role::Admin);
    }

    #[test]
    fn backoff_grows_linearly_and_is_capped() {
        let p = RetryPolicy { attempts: 3, backoff: Duration::from_millis(200) };
        assert_eq!(p.delay_after(1), Duration::from_millis(200));
        assert_eq!(p.delay_after(2), Duration::from_millis(400));
        let huge = RetryPolicy { attempts: 3, backoff: Duration::from_millis(u64::MAX) };
        assert_eq!(huge.delay_after(2), MAX_BACKOFF);
        let edge = RetryPolicy { attempts: 3, backoff: Duration::MAX };
        assert_eq!(edge.delay_after(u32::MAX), MAX_BACKOFF);
    }

    #[tokio::test]
    async fn resolve_is_cached_until_forget() {
        let store = Arc::new(MemoryProfileStore::from_profiles(vec![Profile::new("u1", Role::Tutor, "T")]));
        let r = resolver(store.clone());
        let id = Identity::new("u1");
        let a = r.resolve(&id).await.unwrap();
        let b = r.resolve(&id).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.role, SessionRole::Known(Role::Tutor));
        assert_eq!(store.lookup_count(), 1);
        r.forget("u1");
        assert!(!r.cached("u1"));
        r.resolve(&id).await.unwrap();
        assert_eq!(store.lookup_count(), 2);
    }

    #[tokio::test]
    async fn not_found_is_cached_outage_is_not() {
        let store = Arc::new(MemoryProfileStore::new());
        let r = resolver(store.clone());
        let id = Identity::new("ghost");
        assert_eq!(r.resolve(&id).await.unwrap_err().code_str(), "profile_not_found");
        assert!(r.cached("ghost"));

        store.set_available(false);
        let other = Identity::new("u9");
        let err = r.resolve(&other).await.unwrap_err();
        assert!(err.is_transient());
        assert!(!r.cached("u9"));
        // one lookup for ghost, two attempts for u9
        assert_eq!(store.lookup_count(), 3);
    }

    #[tokio::test]
    async fn retry_recovers_after_outage() {
        let store = Arc::new(MemoryProfileStore::from_profiles(vec![Profile::new("u1", Role::Student, "S")]));
        store.set_available(false);
        let r = Arc::new(RoleResolver::new(
            store.clone(),
            RetryPolicy { attempts: 5, backoff: Duration::from_millis(20) },
        ));
        let r2 = r.clone();
        let task = tokio::spawn(async move { r2.resolve(&Identity::new("u1")).await });
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.set_available(true);
        let res = task.await.unwrap().unwrap();
        assert_eq!(res.role, SessionRole::Known(Role::Student));
    }
}
