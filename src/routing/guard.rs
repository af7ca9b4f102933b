//! Route guard: a pure function of `{role, is_loading, allowed roles}`.

use serde::Serialize;

use crate::identity::{RoleSet, SessionRole, SessionSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardOutcome {
    /// Session still settling; show a neutral placeholder and ask again later.
    Pending,
    Render,
    RedirectToSignIn,
    RedirectToUnauthorized,
}

impl GuardOutcome {
    pub fn is_final(self) -> bool { !matches!(self, GuardOutcome::Pending) }
}

pub fn evaluate(allowed: RoleSet, role: SessionRole, is_loading: bool) -> GuardOutcome {
    if is_loading {
        return GuardOutcome::Pending;
    }
    match role {
        SessionRole::None => GuardOutcome::RedirectToSignIn,
        SessionRole::Unknown => GuardOutcome::RedirectToUnauthorized,
        SessionRole::Known(r) if allowed.accepts(r) => GuardOutcome::Render,
        SessionRole::Known(_) => GuardOutcome::RedirectToUnauthorized,
    }
}

pub fn evaluate_snapshot(allowed: RoleSet, snap: &SessionSnapshot) -> GuardOutcome {
    evaluate(allowed, snap.role, snap.is_loading)
}
