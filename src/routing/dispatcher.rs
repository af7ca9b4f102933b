//! Redirect dispatcher for the public entry page. Stateless: the same role always
//! lands on the same dashboard.

use serde::Serialize;

use crate::identity::{Role, SessionRole, SessionSnapshot};

pub const ENTRY_PATH: &str = "/";
pub const SIGN_IN_PATH: &str = "/login";
pub const UNAUTHORIZED_PATH: &str = "/unauthorized";

/// Home dashboard per role. `admin` and `super_admin` land on different trees even
/// though they share access rights.
pub fn landing_path(role: Role) -> &'static str {
    match role {
        Role::Student => "/etudiant/dashboard",
        Role::Enterprise => "/entreprise/dashboard",
        Role::Teacher => "/enseignant/dashboard",
        Role::Responsible => "/responsable/dashboard",
        Role::Tutor => "/tuteur/dashboard",
        Role::Admin => "/admin/dashboard",
        Role::SuperAdmin => "/super-admin/dashboard",
    }
}

/// Where an authenticated visitor belongs; `None` when there is no session.
pub fn landing_for(role: SessionRole) -> Option<&'static str> {
    match role {
        SessionRole::None => None,
        SessionRole::Unknown => Some(UNAUTHORIZED_PATH),
        SessionRole::Known(r) => Some(landing_path(r)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", content = "to", rename_all = "snake_case")]
pub enum EntryDecision {
    /// Session not settled yet. Do not show the public page, it would flash.
    Pending,
    ShowPublic,
    Redirect(&'static str),
}

pub fn dispatch(role: SessionRole, is_loading: bool) -> EntryDecision {
    if is_loading {
        return EntryDecision::Pending;
    }
    match landing_for(role) {
        Some(to) => EntryDecision::Redirect(to),
        None => EntryDecision::ShowPublic,
    }
}

pub fn dispatch_snapshot(snap: &SessionSnapshot) -> EntryDecision { dispatch(snap.role, snap.is_loading) }
