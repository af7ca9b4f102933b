//! Role-gated routing: the route table, the guard consulted on every navigation, and
//! the dispatcher that sends identified visitors from `/` to their dashboard.

pub mod table;
pub mod guard;
pub mod dispatcher;
pub mod navigator;

pub use table::{Access, RouteDescriptor, RouteMatch, RouteTable};
pub use guard::{evaluate, evaluate_snapshot, GuardOutcome};
pub use dispatcher::{dispatch, dispatch_snapshot, landing_for, landing_path, EntryDecision, ENTRY_PATH, SIGN_IN_PATH, UNAUTHORIZED_PATH};
pub use navigator::{sign_in_url, Navigation, Navigator};
