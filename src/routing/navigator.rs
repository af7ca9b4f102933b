//! Per-navigation entry point: route table lookup, then the guard (or the entry
//! dispatcher for `/`).

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use super::dispatcher::{self, EntryDecision, ENTRY_PATH, SIGN_IN_PATH, UNAUTHORIZED_PATH};
use super::guard::{self, GuardOutcome};
use super::table::{normalize, Access, RouteTable};
use crate::identity::{SessionContext, SessionRole, SessionSnapshot};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Navigation {
    Pending { path: String },
    Render { path: String, route: String, params: BTreeMap<String, String> },
    Redirect { to: String },
    NotFound { path: String },
}

impl Navigation {
    pub fn is_pending(&self) -> bool { matches!(self, Navigation::Pending { .. }) }

    pub fn redirect_target(&self) -> Option<&str> {
        match self {
            Navigation::Redirect { to } => Some(to.as_str()),
            _ => None,
        }
    }
}

/// Sign-in URL that brings the visitor back to `requested` afterwards.
pub fn sign_in_url(requested: &str) -> String {
    format!("{}?redirect={}", SIGN_IN_PATH, urlencoding::encode(requested))
}

#[derive(Clone)]
pub struct Navigator {
    table: Arc<RouteTable>,
}

impl Navigator {
    pub fn new(table: Arc<RouteTable>) -> Self { Self { table } }

    pub fn table(&self) -> &RouteTable { &self.table }

    pub fn navigate(&self, path: &str, snap: &SessionSnapshot) -> Navigation {
        self.navigate_as(path, snap.role, snap.is_loading)
    }

    pub fn navigate_as(&self, path: &str, role: SessionRole, is_loading: bool) -> Navigation {
        let Some(m) = self.table.match_path(path) else {
            return Navigation::NotFound { path: path.to_string() };
        };
        let render = || Navigation::Render {
            path: normalize(path).to_string(),
            route: m.route.path.clone(),
            params: m.params.clone(),
        };
        let nav = if normalize(path) == ENTRY_PATH {
            match dispatcher::dispatch(role, is_loading) {
                EntryDecision::Pending => Navigation::Pending { path: path.to_string() },
                EntryDecision::ShowPublic => render(),
                EntryDecision::Redirect(to) => Navigation::Redirect { to: to.to_string() },
            }
        } else {
            match m.route.access {
                Access::Public => render(),
                Access::Protected(allowed) => match guard::evaluate(allowed, role, is_loading) {
                    GuardOutcome::Pending => Navigation::Pending { path: path.to_string() },
                    GuardOutcome::Render => render(),
                    GuardOutcome::RedirectToSignIn => Navigation::Redirect { to: sign_in_url(path) },
                    GuardOutcome::RedirectToUnauthorized => Navigation::Redirect { to: UNAUTHORIZED_PATH.to_string() },
                },
            }
        };
        debug!(target: "stagegate::routing", "navigate path={} role={} loading={} -> {:?}", path, role, is_loading, nav);
        nav
    }

    /// Re-evaluate `path` on every session change until the answer is no longer
    /// pending. A session stuck in `Unavailable` keeps this waiting; callers bound it
    /// with a timeout.
    pub async fn navigate_settled(&self, path: &str, ctx: &SessionContext) -> Navigation {
        let mut rx = ctx.changes();
        let settled = match rx.wait_for(|s| !self.navigate(path, s).is_pending()).await {
            Ok(s) => s.clone(),
            Err(_) => ctx.snapshot(),
        };
        self.navigate(path, &settled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Role;

    fn nav() -> Navigator { Navigator::new(Arc::new(RouteTable::builtin())) }

    #[test]
    fn unknown_path_is_not_found() {
        assert_eq!(
            nav().navigate_as("/nowhere", SessionRole::None, false),
            Navigation::NotFound { path: "/nowhere".into() }
        );
    }

    #[test]
    fn sign_in_redirect_carries_requested_path() {
        let n = nav().navigate_as("/etudiant/stages/12", SessionRole::None, false);
        assert_eq!(n.redirect_target(), Some("/login?redirect=%2Fetudiant%2Fstages%2F12"));
    }

    #[test]
    fn public_pages_render_even_while_loading() {
        let n = nav().navigate_as("/offres/7", SessionRole::Unknown, true);
        match n {
            Navigation::Render { route, params, .. } => {
                assert_eq!(route, "/offres/:id");
                assert_eq!(params.get("id").map(String::as_str), Some("7"));
            }
            other => panic!("expected render, got {:?}", other),
        }
    }

    #[test]
    fn entry_path_goes_through_dispatcher() {
        let n = nav();
        assert!(n.navigate_as("/", SessionRole::Known(Role::Student), true).is_pending());
        assert_eq!(n.navigate_as("/", Role::Student.into(), false).redirect_target(), Some("/etudiant/dashboard"));
        assert!(matches!(n.navigate_as("/?lang=fr", SessionRole::None, false), Navigation::Render { .. }));
    }
}
