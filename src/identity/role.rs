use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PortalError;

/// Closed set of portal roles. Each one owns a dashboard tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Enterprise,
    Teacher,
    Responsible,
    Tutor,
    Admin,
    SuperAdmin,
}

impl Role {
    pub const ALL: [Role; 7] = [
        Role::Student,
        Role::Enterprise,
        Role::Teacher,
        Role::Responsible,
        Role::Tutor,
        Role::Admin,
        Role::SuperAdmin,
    ];

    /// Precedence used when one identity has records in several role collections.
    /// Lower wins.
    pub const PRECEDENCE: [Role; 7] = [
        Role::SuperAdmin,
        Role::Admin,
        Role::Responsible,
        Role::Teacher,
        Role::Tutor,
        Role::Enterprise,
        Role::Student,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Enterprise => "enterprise",
            Role::Teacher => "teacher",
            Role::Responsible => "responsible",
            Role::Tutor => "tutor",
            Role::Admin => "admin",
            Role::SuperAdmin => "super_admin",
        }
    }

    pub fn precedence(self) -> usize {
        Role::PRECEDENCE.iter().position(|r| *r == self).unwrap_or(usize::MAX)
    }

    /// `admin` and `super_admin` share access rights but keep distinct dashboards.
    pub fn is_administrator(self) -> bool {
        matches!(self, Role::Admin | Role::SuperAdmin)
    }

    const fn bit(self) -> u8 {
        match self {
            Role::Student => 1 << 0,
            Role::Enterprise => 1 << 1,
            Role::Teacher => 1 << 2,
            Role::Responsible => 1 << 3,
            Role::Tutor => 1 << 4,
            Role::Admin => 1 << 5,
            Role::SuperAdmin => 1 << 6,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for Role {
    type Err = PortalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_ascii_lowercase().replace('-', "_");
        Role::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == norm)
            .ok_or_else(|| PortalError::config("unknown_role".to_string(), format!("unknown role '{}'", s)))
    }
}

/// Role attached to the current visitor: no session, a session whose role is not
/// known (unresolved or unresolvable), or a resolved portal role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum SessionRole {
    None,
    Unknown,
    Known(Role),
}

impl SessionRole {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionRole::None => "none",
            SessionRole::Unknown => "unknown",
            SessionRole::Known(r) => r.as_str(),
        }
    }

    pub fn known(self) -> Option<Role> {
        match self {
            SessionRole::Known(r) => Some(r),
            _ => None,
        }
    }
}

impl From<Role> for SessionRole {
    fn from(r: Role) -> Self { SessionRole::Known(r) }
}

impl From<SessionRole> for String {
    fn from(r: SessionRole) -> Self { r.as_str().to_string() }
}

impl TryFrom<String> for SessionRole {
    type Error = PortalError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "none" => Ok(SessionRole::None),
            "unknown" => Ok(SessionRole::Unknown),
            other => other.parse::<Role>().map(SessionRole::Known),
        }
    }
}

impl fmt::Display for SessionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Set of roles allowed on a protected route.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Role>", into = "Vec<Role>")]
pub struct RoleSet(u8);

impl RoleSet {
    pub const EMPTY: RoleSet = RoleSet(0);

    pub const fn of(roles: &[Role]) -> RoleSet {
        let mut bits = 0u8;
        let mut i = 0;
        while i < roles.len() {
            bits |= roles[i].bit();
            i += 1;
        }
        RoleSet(bits)
    }

    pub fn all() -> RoleSet { RoleSet::of(&Role::ALL) }

    pub fn is_empty(self) -> bool { self.0 == 0 }

    /// Literal membership, without the administrator equivalence.
    pub fn contains(self, role: Role) -> bool { self.0 & role.bit() != 0 }

    /// Membership under the access rule: an administrator is accepted wherever
    /// either administrator role is listed.
    pub fn accepts(self, role: Role) -> bool {
        if self.contains(role) { return true; }
        role.is_administrator() && (self.contains(Role::Admin) || self.contains(Role::SuperAdmin))
    }

    pub fn union(self, other: RoleSet) -> RoleSet { RoleSet(self.0 | other.0) }

    pub fn iter(self) -> impl Iterator<Item = Role> {
        Role::ALL.into_iter().filter(move |r| self.contains(*r))
    }
}

impl fmt::Debug for RoleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.debug_set().entries(self.iter()).finish() }
}

impl From<Vec<Role>> for RoleSet {
    fn from(v: Vec<Role>) -> Self {
        v.into_iter().fold(RoleSet::EMPTY, |acc, r| acc.union(RoleSet::of(&[r])))
    }
}

impl From<RoleSet> for Vec<Role> {
    fn from(s: RoleSet) -> Self { s.iter().collect() }
}
