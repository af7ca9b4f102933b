use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::principal::Identity;
use super::provider::IdentityProvider;
use super::subscription::{Listeners, Subscription};
use crate::error::PortalResult;

struct StoreShared {
    last: RwLock<Option<Identity>>,
    listeners: Listeners<Option<Identity>>,
    /// One change and its delivery at a time, so subscribers see the same order as
    /// `last` went through.
    delivery: Mutex<()>,
    /// Provider events applied so far.
    events: AtomicU64,
}

impl StoreShared {
    fn on_provider_event(&self, next: Option<Identity>) {
        let _turn = self.delivery.lock();
        self.events.fetch_add(1, Ordering::SeqCst);
        self.apply(next);
    }

    /// Record the provider's latest view. Subscribers hear about it only when the
    /// identity actually changes (sign-in, sign-out, switch to another id).
    /// Caller holds the delivery turn.
    fn apply(&self, next: Option<Identity>) {
        let changed = {
            let mut last = self.last.write();
            let changed = last.as_ref().map(|i| &i.id) != next.as_ref().map(|i| &i.id);
            *last = next.clone();
            changed
        };
        if changed {
            debug!(
                target: "stagegate::session",
                "session_store.transition id={:?}",
                next.as_ref().map(|i| i.id.as_str())
            );
            self.listeners.emit(&next);
        }
    }
}

/// Current identity plus a change stream, wrapped around the identity provider.
pub struct SessionStore {
    shared: Arc<StoreShared>,
    provider: Arc<dyn IdentityProvider>,
    _provider_sub: Subscription,
}

impl SessionStore {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        let shared = Arc::new(StoreShared {
            last: RwLock::new(None),
            listeners: Listeners::new(),
            delivery: Mutex::new(()),
            events: AtomicU64::new(0),
        });
        let feed = shared.clone();
        let sub = provider.on_session_change(Arc::new(move |next: &Option<Identity>| {
            feed.on_provider_event(next.clone())
        }));
        Self { shared, provider, _provider_sub: sub }
    }

    /// Ask the provider for its current session and publish it. This is the initial
    /// session check; it is the only call here that can fail.
    pub async fn refresh(&self) -> PortalResult<Option<Identity>> { self.check(|_| {}).await }

    /// Initial session check. `settle` sees the outcome within the same delivery turn
    /// as the publish, so no provider event can land in between. If the provider
    /// reported a change while the check was in flight, that event wins and the
    /// check's answer is dropped.
    pub(crate) async fn check<F>(&self, settle: F) -> PortalResult<Option<Identity>>
    where
        F: FnOnce(&Option<Identity>) + Send,
    {
        let seen = self.shared.events.load(Ordering::SeqCst);
        let fetched = self.provider.current_identity().await?;
        let _turn = self.shared.delivery.lock();
        let cur = if self.shared.events.load(Ordering::SeqCst) == seen {
            self.shared.apply(fetched.clone());
            fetched
        } else {
            debug!(target: "stagegate::session", "session_store.check_superseded");
            self.shared.last.read().clone()
        };
        settle(&cur);
        Ok(cur)
    }

    /// Last known identity. Never blocks on the provider.
    pub fn current(&self) -> Option<Identity> { self.shared.last.read().clone() }

    pub fn subscribe<F>(&self, on_change: F) -> Subscription
    where
        F: Fn(&Option<Identity>) + Send + Sync + 'static,
    {
        self.shared.listeners.subscribe(on_change)
    }

    pub fn provider(&self) -> &Arc<dyn IdentityProvider> { &self.provider }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Callback, LocalIdentityProvider};
    use async_trait::async_trait;
    use tokio::sync::Notify;

    fn recording(store: &SessionStore) -> (Arc<Mutex<Vec<Option<String>>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let sub = store.subscribe(move |i| s.lock().push(i.as_ref().map(|i| i.id.clone())));
        (seen, sub)
    }

    #[tokio::test]
    async fn emits_once_per_transition() {
        let provider = Arc::new(LocalIdentityProvider::new());
        let store = SessionStore::new(provider.clone());
        let (seen, _sub) = recording(&store);

        provider.sign_in(Identity::new("u1"));
        provider.refresh_token();
        provider.sign_in(Identity::new("u1").with_email("u1@school.fr"));
        provider.sign_in(Identity::new("u2"));
        provider.expire();
        provider.expire();

        assert_eq!(*seen.lock(), vec![Some("u1".to_string()), Some("u2".to_string()), None]);
        assert_eq!(store.current(), None);
    }

    #[tokio::test]
    async fn refresh_publishes_initial_session() {
        let provider = Arc::new(LocalIdentityProvider::with_identity(Identity::new("boot")));
        let store = SessionStore::new(provider.clone());
        let (seen, _sub) = recording(&store);
        assert_eq!(store.current(), None);
        let cur = store.refresh().await.unwrap();
        assert_eq!(cur.map(|i| i.id), Some("boot".to_string()));
        assert_eq!(seen.lock().len(), 1);
        // a second check with no change stays silent
        store.refresh().await.unwrap();
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn refresh_reports_unavailable_provider() {
        let provider = Arc::new(LocalIdentityProvider::new());
        provider.set_available(false);
        let store = SessionStore::new(provider);
        let err = store.refresh().await.unwrap_err();
        assert!(err.is_transient());
    }

    /// Provider whose session check answers with what it read, but only after the
    /// gate opens.
    struct SlowCheck {
        inner: LocalIdentityProvider,
        gate: Notify,
    }

    #[async_trait]
    impl IdentityProvider for SlowCheck {
        async fn current_identity(&self) -> PortalResult<Option<Identity>> {
            let answer = self.inner.current_identity().await;
            self.gate.notified().await;
            answer
        }

        fn on_session_change(&self, callback: Callback<Option<Identity>>) -> Subscription {
            self.inner.on_session_change(callback)
        }

        async fn sign_out(&self) -> PortalResult<()> { self.inner.sign_out().await }
    }

    #[tokio::test]
    async fn event_during_check_wins_over_check_result() {
        let provider = Arc::new(SlowCheck {
            inner: LocalIdentityProvider::with_identity(Identity::new("boot")),
            gate: Notify::new(),
        });
        let store = SessionStore::new(provider.clone());
        let (seen, _sub) = recording(&store);

        let settled = Arc::new(Mutex::new(None));
        let s = settled.clone();
        let check = store.check(move |cur| *s.lock() = cur.as_ref().map(|i| i.id.clone()));
        let newer = async {
            tokio::task::yield_now().await;
            provider.inner.sign_in(Identity::new("next"));
            provider.gate.notify_one();
        };
        let (cur, ()) = tokio::join!(check, newer);

        assert_eq!(cur.unwrap().map(|i| i.id), Some("next".to_string()));
        assert_eq!(*settled.lock(), Some("next".to_string()));
        assert_eq!(store.current().map(|i| i.id), Some("next".to_string()));
        assert_eq!(*seen.lock(), vec![Some("next".to_string())]);
    }

    #[tokio::test]
    async fn dropping_store_releases_provider_listener() {
        let provider = Arc::new(LocalIdentityProvider::new());
        let store = SessionStore::new(provider.clone());
        drop(store);
        // no listener left to panic or leak
        provider.sign_in(Identity::new("late"));
    }
}
