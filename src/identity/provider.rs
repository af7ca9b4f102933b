use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::principal::Identity;
use super::subscription::{Callback, Listeners, Subscription};
use crate::error::{PortalError, PortalResult};

/// Minimal surface of the external identity provider. Credential checks live behind it.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Initial session check. Fails with `IdentityUnavailable` when the provider cannot
    /// be reached.
    async fn current_identity(&self) -> PortalResult<Option<Identity>>;

    /// Register for session events. The provider may report the same identity again
    /// (token refresh); filtering is the session store's job.
    fn on_session_change(&self, callback: Callback<Option<Identity>>) -> Subscription;

    async fn sign_out(&self) -> PortalResult<()>;
}

/// In-process provider used by the HTTP surface and tests.
pub struct LocalIdentityProvider {
    current: Mutex<Option<Identity>>,
    /// Held across a state change and its delivery so listeners hear changes in the
    /// order they happened. Listeners must not call back into the provider.
    delivery: Mutex<()>,
    available: AtomicBool,
    listeners: Listeners<Option<Identity>>,
}

impl Default for LocalIdentityProvider {
    fn default() -> Self {
        Self {
            current: Mutex::new(None),
            delivery: Mutex::new(()),
            available: AtomicBool::new(true),
            listeners: Listeners::new(),
        }
    }
}

impl LocalIdentityProvider {
    pub fn new() -> Self { Self::default() }

    /// Start with an already signed-in identity, as after a page reload.
    pub fn with_identity(identity: Identity) -> Self {
        let p = Self::default();
        *p.current.lock() = Some(identity);
        p
    }

    pub fn sign_in(&self, identity: Identity) {
        info!(target: "stagegate::session", "provider.sign_in id={}", identity.id);
        let _turn = self.delivery.lock();
        *self.current.lock() = Some(identity.clone());
        self.listeners.emit(&Some(identity));
    }

    /// Token refresh: re-announces the identity without changing it.
    pub fn refresh_token(&self) {
        let _turn = self.delivery.lock();
        let cur = self.current.lock().clone();
        if cur.is_some() {
            debug!(target: "stagegate::session", "provider.refresh_token");
            self.listeners.emit(&cur);
        }
    }

    /// Provider-side expiry. Indistinguishable from sign-out for listeners.
    pub fn expire(&self) {
        info!(target: "stagegate::session", "provider.expire");
        self.clear();
    }

    pub fn set_available(&self, up: bool) { self.available.store(up, Ordering::SeqCst); }

    fn clear(&self) {
        let _turn = self.delivery.lock();
        let had = self.current.lock().take().is_some();
        if had { self.listeners.emit(&None); }
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    async fn current_identity(&self) -> PortalResult<Option<Identity>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(PortalError::identity_unavailable("identity provider unreachable"));
        }
        Ok(self.current.lock().clone())
    }

    fn on_session_change(&self, callback: Callback<Option<Identity>>) -> Subscription {
        self.listeners.subscribe_callback(callback)
    }

    async fn sign_out(&self) -> PortalResult<()> {
        info!(target: "stagegate::session", "provider.sign_out");
        self.clear();
        Ok(())
    }
}
