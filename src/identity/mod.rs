//! Identity, roles and the per-visitor session state machine.
//! Keep the public surface thin and split implementation across sub-modules.

mod principal;
mod role;
mod subscription;
mod provider;
mod session;
mod profile_store;
mod resolver;
mod context;

pub use principal::{Identity, Profile};
pub use role::{Role, RoleSet, SessionRole};
pub use subscription::{Callback, Listeners, Subscription};
pub use provider::{IdentityProvider, LocalIdentityProvider};
pub use session::SessionStore;
pub use profile_store::{MemoryProfileStore, ProfileStore};
pub use resolver::{pick_by_precedence, Resolution, RetryPolicy, RoleResolver, MAX_BACKOFF};
pub use context::{Diagnostic, SessionContext, SessionPhase, SessionSnapshot};
