//! Session context: the single owner of "who is the current visitor and what can
//! they do". It listens to the session store, drives the role resolver on every
//! identity change and publishes read-only snapshots through a watch channel.
//!
//! Phases:
//! - `Unauthenticated`: no identity (initial, and after sign-out or expiry).
//! - `Resolving`: identity present, role lookup in flight.
//! - `Authenticated(role)`: role resolved, `unknown` included.
//! - `Unavailable`: provider or profile store unreachable. Stays loading until
//!   `retry()` or the next identity change; never grants a role.
//!
//! Every identity change bumps a generation counter. A resolution finishing under an
//! older generation, or for another identity id, is discarded.

use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::principal::{Identity, Profile};
use super::resolver::{Resolution, RoleResolver};
use super::role::SessionRole;
use super::session::SessionStore;
use super::subscription::Subscription;
use crate::error::{PortalError, PortalResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", content = "role", rename_all = "snake_case")]
pub enum SessionPhase {
    Unauthenticated,
    Resolving,
    Authenticated(SessionRole),
    Unavailable,
}

/// Why a session ended up with role `unknown` or stuck loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Diagnostic {
    IdentityUnavailable,
    ProfileNotFound,
    RoleAmbiguous,
    ProfileStoreUnavailable,
}

impl Diagnostic {
    fn for_error(e: &PortalError) -> Diagnostic {
        match e {
            PortalError::IdentityUnavailable { .. } => Diagnostic::IdentityUnavailable,
            PortalError::ProfileStoreUnavailable { .. } => Diagnostic::ProfileStoreUnavailable,
            PortalError::RoleAmbiguous { .. } => Diagnostic::RoleAmbiguous,
            _ => Diagnostic::ProfileNotFound,
        }
    }
}

/// What consumers see. Cloned out of the context, never written back.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub identity: Option<Identity>,
    pub role: SessionRole,
    pub profile: Option<Profile>,
    pub is_loading: bool,
    pub phase: SessionPhase,
    pub diagnostic: Option<Diagnostic>,
    pub generation: u64,
    pub updated_at: DateTime<Utc>,
}

impl SessionSnapshot {
    fn booting() -> Self {
        Self {
            identity: None,
            role: SessionRole::None,
            profile: None,
            is_loading: true,
            phase: SessionPhase::Unauthenticated,
            diagnostic: None,
            generation: 0,
            updated_at: Utc::now(),
        }
    }

    fn unauthenticated(generation: u64) -> Self {
        Self { is_loading: false, generation, ..Self::booting() }
    }

    fn resolving(identity: Identity, generation: u64) -> Self {
        Self {
            identity: Some(identity),
            role: SessionRole::Unknown,
            is_loading: true,
            phase: SessionPhase::Resolving,
            generation,
            ..Self::booting()
        }
    }

    fn unavailable(identity: Option<Identity>, diagnostic: Diagnostic, generation: u64) -> Self {
        Self {
            identity,
            role: SessionRole::Unknown,
            is_loading: true,
            phase: SessionPhase::Unavailable,
            diagnostic: Some(diagnostic),
            generation,
            ..Self::booting()
        }
    }

    fn authenticated(identity: Identity, res: Resolution, diagnostic: Option<Diagnostic>, generation: u64) -> Self {
        Self {
            identity: Some(identity),
            role: res.role,
            profile: res.profile,
            is_loading: false,
            phase: SessionPhase::Authenticated(res.role),
            diagnostic,
            generation,
            updated_at: Utc::now(),
        }
    }

    /// What a visitor without a session sees: signed out and settled.
    pub fn anonymous() -> Self { Self::unauthenticated(0) }

    pub fn is_authenticated(&self) -> bool { matches!(self.phase, SessionPhase::Authenticated(_)) }
}

struct Control {
    generation: u64,
    identity: Option<Identity>,
    /// False until the initial session check (or a provider event) has told us who
    /// the visitor is.
    checked: bool,
    task: Option<JoinHandle<()>>,
}

struct Inner {
    control: Mutex<Control>,
    tx: watch::Sender<SessionSnapshot>,
    resolver: Arc<RoleResolver>,
    runtime: tokio::runtime::Handle,
}

impl Inner {
    fn publish(&self, snap: SessionSnapshot) {
        debug!(
            target: "stagegate::session",
            "session.publish gen={} phase={:?} role={} loading={}",
            snap.generation, snap.phase, snap.role, snap.is_loading
        );
        self.tx.send_replace(snap);
    }

    fn on_identity(self: &Arc<Self>, next: Option<Identity>) {
        let mut ctl = self.control.lock();
        let same = ctl.identity.as_ref().map(|i| &i.id) == next.as_ref().map(|i| &i.id);
        if ctl.checked && same {
            return;
        }
        ctl.checked = true;
        if let Some(prev) = ctl.identity.take() {
            if !same { self.resolver.forget(&prev.id); }
        }
        ctl.generation += 1;
        ctl.identity = next.clone();
        let generation = ctl.generation;
        match next {
            None => {
                info!(target: "stagegate::session", "session.unauthenticated gen={}", generation);
                self.publish(SessionSnapshot::unauthenticated(generation));
            }
            Some(identity) => {
                info!(target: "stagegate::session", "session.resolving id={} gen={}", identity.id, generation);
                self.publish(SessionSnapshot::resolving(identity.clone(), generation));
                ctl.task = Some(self.spawn_resolution(identity, generation));
            }
        }
    }

    fn spawn_resolution(self: &Arc<Self>, identity: Identity, generation: u64) -> JoinHandle<()> {
        let weak: Weak<Inner> = Arc::downgrade(self);
        let resolver = self.resolver.clone();
        self.runtime.spawn(async move {
            let outcome = resolver.resolve(&identity).await;
            if let Some(inner) = weak.upgrade() {
                inner.finish(identity, generation, outcome);
            }
        })
    }

    fn finish(&self, identity: Identity, generation: u64, outcome: PortalResult<Resolution>) {
        let ctl = self.control.lock();
        let current_id = ctl.identity.as_ref().map(|i| i.id.as_str());
        if ctl.generation != generation || current_id != Some(identity.id.as_str()) {
            debug!(
                target: "stagegate::session",
                "session.discard_stale id={} gen={} current_gen={}",
                identity.id, generation, ctl.generation
            );
            if current_id != Some(identity.id.as_str()) {
                self.resolver.forget(&identity.id);
            }
            return;
        }
        let snap = match outcome {
            Ok(res) => {
                info!(target: "stagegate::session", "session.authenticated id={} role={}", identity.id, res.role);
                SessionSnapshot::authenticated(identity, res, None, generation)
            }
            Err(e) if e.is_transient() => {
                warn!(target: "stagegate::session", "session.unavailable id={} err={}", identity.id, e);
                SessionSnapshot::unavailable(Some(identity), Diagnostic::for_error(&e), generation)
            }
            Err(e) => {
                info!(target: "stagegate::session", "session.role_unknown id={} reason={}", identity.id, e.code_str());
                SessionSnapshot::authenticated(identity, Resolution::unknown(), Some(Diagnostic::for_error(&e)), generation)
            }
        };
        self.publish(snap);
    }

    fn on_check_failed(&self, err: &PortalError) {
        let ctl = self.control.lock();
        if ctl.checked {
            return;
        }
        warn!(target: "stagegate::session", "session.initial_check_failed err={}", err);
        self.publish(SessionSnapshot::unavailable(None, Diagnostic::for_error(err), ctl.generation));
    }

    fn retry_resolution(self: &Arc<Self>) {
        let mut ctl = self.control.lock();
        let Some(identity) = ctl.identity.clone() else { return };
        ctl.generation += 1;
        let generation = ctl.generation;
        info!(target: "stagegate::session", "session.retry id={} gen={}", identity.id, generation);
        self.publish(SessionSnapshot::resolving(identity.clone(), generation));
        ctl.task = Some(self.spawn_resolution(identity, generation));
    }
}

/// Lifecycle-scoped session state container. Create one per visitor with
/// [`SessionContext::start`]; dropping it releases the store subscription and aborts
/// any resolution still in flight.
pub struct SessionContext {
    inner: Arc<Inner>,
    store: SessionStore,
    _subscription: Subscription,
}

impl SessionContext {
    /// Subscribe to the store and run the initial session check. Must be called from
    /// within a tokio runtime.
    pub async fn start(store: SessionStore, resolver: Arc<RoleResolver>) -> Self {
        let (tx, _rx) = watch::channel(SessionSnapshot::booting());
        let inner = Arc::new(Inner {
            control: Mutex::new(Control { generation: 0, identity: None, checked: false, task: None }),
            tx,
            resolver,
            runtime: tokio::runtime::Handle::current(),
        });
        let weak = Arc::downgrade(&inner);
        let subscription = store.subscribe(move |next| {
            if let Some(inner) = weak.upgrade() {
                inner.on_identity(next.clone());
            }
        });
        let ctx = Self { inner, store, _subscription: subscription };
        ctx.initial_check().await;
        ctx
    }

    async fn initial_check(&self) {
        let inner = &self.inner;
        if let Err(e) = self.store.check(|cur| inner.on_identity(cur.clone())).await {
            inner.on_check_failed(&e);
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot { self.inner.tx.borrow().clone() }

    /// Change stream for consumers that re-evaluate on every state change.
    pub fn changes(&self) -> watch::Receiver<SessionSnapshot> { self.inner.tx.subscribe() }

    /// Wait for the first snapshot that is not loading.
    pub async fn settled(&self) -> SessionSnapshot {
        let mut rx = self.changes();
        let out = match rx.wait_for(|s| !s.is_loading).await {
            Ok(s) => s.clone(),
            Err(_) => self.snapshot(),
        };
        out
    }

    /// Leave the `Unavailable` state: redo the initial check when the provider was
    /// unreachable, or re-run the lookup when the profile store was.
    pub async fn retry(&self) {
        let snap = self.snapshot();
        match snap.diagnostic {
            Some(Diagnostic::IdentityUnavailable) => self.initial_check().await,
            Some(Diagnostic::ProfileStoreUnavailable) => self.inner.retry_resolution(),
            _ => {}
        }
    }

    /// Sign-out goes through the identity provider; the resulting event resets us.
    pub async fn sign_out(&self) -> PortalResult<()> { self.store.provider().sign_out().await }

    pub fn store(&self) -> &SessionStore { &self.store }

    pub fn close(self) {}
}

impl Drop for SessionContext {
    fn drop(&mut self) {
        if let Some(task) = self.inner.control.lock().task.take() {
            task.abort();
        }
        debug!(target: "stagegate::session", "session.context_closed");
    }
}
