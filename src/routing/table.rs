//! Declarative route table. Protecting a new page is an edit to this data, never to
//! the guard.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use super::dispatcher::{landing_path, ENTRY_PATH, SIGN_IN_PATH, UNAUTHORIZED_PATH};
use crate::error::{PortalError, PortalResult};
use crate::identity::{Role, RoleSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    Public,
    Protected(RoleSet),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDescriptor {
    /// Path pattern; `:name` segments match any single segment.
    pub path: String,
    pub access: Access,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl RouteDescriptor {
    pub fn public<S: Into<String>>(path: S) -> Self { Self { path: path.into(), access: Access::Public, title: None } }

    pub fn protected<S: Into<String>>(path: S, roles: &[Role]) -> Self {
        Self { path: path.into(), access: Access::Protected(RoleSet::of(roles)), title: None }
    }

    pub fn titled<S: Into<String>>(mut self, title: S) -> Self {
        self.title = Some(title.into());
        self
    }

    fn segments(&self) -> Vec<&str> { split(&self.path) }
}

/// A matched route plus the values captured by its `:param` segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch<'a> {
    pub route: &'a RouteDescriptor,
    pub params: BTreeMap<String, String>,
}

/// Strip query and fragment, then the trailing slash (root excepted).
pub fn normalize(path: &str) -> &str {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    let p = &path[..end];
    let trimmed = p.trim_end_matches('/');
    if trimmed.is_empty() { "/" } else { trimmed }
}

fn split(path: &str) -> Vec<&str> {
    normalize(path).split('/').filter(|s| !s.is_empty()).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTable {
    pub routes: Vec<RouteDescriptor>,
}

use Role::*;

const ADMINS: &[Role] = &[SuperAdmin, Admin];
const EVERYONE: &[Role] = &[Student, Enterprise, Teacher, Responsible, Tutor, Admin, SuperAdmin];

static BUILTIN: Lazy<RouteTable> = Lazy::new(|| RouteTable {
    routes: vec![
        RouteDescriptor::public(ENTRY_PATH).titled("Accueil"),
        RouteDescriptor::public(SIGN_IN_PATH).titled("Connexion"),
        RouteDescriptor::public("/register").titled("Inscription"),
        RouteDescriptor::public("/register/entreprise").titled("Inscription entreprise"),
        RouteDescriptor::public("/mot-de-passe-oublie").titled("Mot de passe oublié"),
        RouteDescriptor::public(UNAUTHORIZED_PATH).titled("Accès refusé"),
        RouteDescriptor::public("/offres").titled("Offres de stage"),
        RouteDescriptor::public("/offres/:id").titled("Offre"),
        // student
        RouteDescriptor::protected("/etudiant/dashboard", &[Student]),
        RouteDescriptor::protected("/etudiant/stages", &[Student]),
        RouteDescriptor::protected("/etudiant/stages/:id", &[Student]),
        RouteDescriptor::protected("/etudiant/candidatures", &[Student]),
        RouteDescriptor::protected("/etudiant/documents", &[Student]),
        RouteDescriptor::protected("/etudiant/rapports", &[Student]),
        RouteDescriptor::protected("/etudiant/profil", &[Student]),
        // enterprise
        RouteDescriptor::protected("/entreprise/dashboard", &[Enterprise]),
        RouteDescriptor::protected("/entreprise/offres", &[Enterprise]),
        RouteDescriptor::protected("/entreprise/offres/nouvelle", &[Enterprise]),
        RouteDescriptor::protected("/entreprise/offres/:id", &[Enterprise]),
        RouteDescriptor::protected("/entreprise/candidatures", &[Enterprise]),
        RouteDescriptor::protected("/entreprise/stagiaires", &[Enterprise]),
        RouteDescriptor::protected("/entreprise/profil", &[Enterprise]),
        // teacher
        RouteDescriptor::protected("/enseignant/dashboard", &[Teacher]),
        RouteDescriptor::protected("/enseignant/etudiants", &[Teacher]),
        RouteDescriptor::protected("/enseignant/evaluations", &[Teacher]),
        RouteDescriptor::protected("/enseignant/soutenances", &[Teacher]),
        RouteDescriptor::protected("/enseignant/profil", &[Teacher]),
        // academic responsible
        RouteDescriptor::protected("/responsable/dashboard", &[Responsible]),
        RouteDescriptor::protected("/responsable/conventions", &[Responsible]),
        RouteDescriptor::protected("/responsable/conventions/:id", &[Responsible]),
        RouteDescriptor::protected("/responsable/affectations", &[Responsible]),
        RouteDescriptor::protected("/responsable/enseignants", &[Responsible]),
        RouteDescriptor::protected("/responsable/statistiques", &[Responsible, SuperAdmin]),
        // tutor
        RouteDescriptor::protected("/tuteur/dashboard", &[Tutor]),
        RouteDescriptor::protected("/tuteur/stagiaires", &[Tutor]),
        RouteDescriptor::protected("/tuteur/evaluations", &[Tutor]),
        RouteDescriptor::protected("/tuteur/profil", &[Tutor]),
        // administration
        RouteDescriptor::protected("/admin/dashboard", &[Admin]),
        RouteDescriptor::protected("/admin/utilisateurs", &[Admin]),
        RouteDescriptor::protected("/super-admin/dashboard", ADMINS),
        RouteDescriptor::protected("/super-admin/etablissements", &[SuperAdmin]),
        RouteDescriptor::protected("/super-admin/utilisateurs", ADMINS),
        RouteDescriptor::protected("/super-admin/parametres", &[SuperAdmin]),
        // shared
        RouteDescriptor::protected("/messagerie", EVERYONE),
        RouteDescriptor::protected("/notifications", EVERYONE),
    ],
});

impl RouteTable {
    pub fn new(routes: Vec<RouteDescriptor>) -> Self { Self { routes } }

    /// The portal's page map.
    pub fn builtin() -> RouteTable { BUILTIN.clone() }

    pub fn from_json_str(text: &str) -> PortalResult<Self> {
        let table: RouteTable = serde_json::from_str(text)?;
        table.validate()?;
        Ok(table)
    }

    pub fn from_json_file(path: &Path) -> PortalResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PortalError::config("routes_file".to_string(), format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&text)
    }

    pub fn len(&self) -> usize { self.routes.len() }

    pub fn is_empty(&self) -> bool { self.routes.is_empty() }

    /// Best match for a concrete path: the pattern with the most literal segments,
    /// earliest entry on a tie.
    pub fn match_path(&self, path: &str) -> Option<RouteMatch<'_>> {
        let segs = split(path);
        let mut best: Option<(usize, RouteMatch<'_>)> = None;
        for route in &self.routes {
            let pat = route.segments();
            if pat.len() != segs.len() { continue; }
            let mut params = BTreeMap::new();
            let mut literals = 0;
            let mut ok = true;
            for (p, s) in pat.iter().zip(segs.iter()) {
                if let Some(name) = p.strip_prefix(':') {
                    params.insert(name.to_string(), (*s).to_string());
                } else if p == s {
                    literals += 1;
                } else {
                    ok = false;
                    break;
                }
            }
            if !ok { continue; }
            if best.as_ref().map(|(score, _)| literals > *score).unwrap_or(true) {
                best = Some((literals, RouteMatch { route, params }));
            }
        }
        best.map(|(_, m)| m)
    }

    /// Union of every protected route's role set.
    pub fn covered_roles(&self) -> RoleSet {
        self.routes.iter().fold(RoleSet::EMPTY, |acc, r| match r.access {
            Access::Protected(set) => acc.union(set),
            Access::Public => acc,
        })
    }

    /// Check the table's invariants:
    /// - patterns start with `/` and appear once
    /// - protected routes name at least one role
    /// - every role can reach at least one protected route
    /// - every role's landing page exists and lets that role in
    /// - entry, sign-in and unauthorized pages exist and are public
    pub fn validate(&self) -> PortalResult<()> {
        let mut seen = HashSet::new();
        for r in &self.routes {
            if !r.path.starts_with('/') {
                return Err(PortalError::route_table("bad_pattern".to_string(), format!("route '{}' must start with '/'", r.path)));
            }
            if !seen.insert(normalize(&r.path).to_string()) {
                return Err(PortalError::route_table("duplicate_route".to_string(), format!("route '{}' declared twice", r.path)));
            }
            if let Access::Protected(set) = r.access {
                if set.is_empty() {
                    return Err(PortalError::route_table("empty_role_set".to_string(), format!("route '{}' allows no role", r.path)));
                }
            }
        }
        let covered = self.covered_roles();
        for role in Role::ALL {
            if !covered.accepts(role) {
                return Err(PortalError::route_table("orphaned_role".to_string(), format!("no protected route accepts role '{}'", role)));
            }
            let landing = landing_path(role);
            match self.match_path(landing).map(|m| m.route.access) {
                Some(Access::Protected(set)) if set.accepts(role) => {}
                _ => {
                    return Err(PortalError::route_table(
                        "bad_landing".to_string(),
                        format!("landing page '{}' does not admit role '{}'", landing, role),
                    ))
                }
            }
        }
        for special in [ENTRY_PATH, SIGN_IN_PATH, UNAUTHORIZED_PATH] {
            match self.match_path(special).map(|m| m.route.access) {
                Some(Access::Public) => {}
                _ => {
                    return Err(PortalError::route_table(
                        "missing_public_page".to_string(),
                        format!("'{}' must be declared public", special),
                    ))
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_table_is_valid() {
        RouteTable::builtin().validate().unwrap();
    }

    #[test]
    fn normalize_strips_query_and_slash() {
        assert_eq!(normalize("/etudiant/stages/?tab=2#top"), "/etudiant/stages");
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize(""), "/");
        assert_eq!(normalize("/?x=1"), "/");
    }

    #[test]
    fn literal_segments_win_over_params() {
        let t = RouteTable::builtin();
        let m = t.match_path("/entreprise/offres/nouvelle").unwrap();
        assert_eq!(m.route.path, "/entreprise/offres/nouvelle");
        assert!(m.params.is_empty());
        let m = t.match_path("/entreprise/offres/42").unwrap();
        assert_eq!(m.route.path, "/entreprise/offres/:id");
        assert_eq!(m.params.get("id").map(String::as_str), Some("42"));
        assert!(t.match_path("/entreprise/offres/42/edit").is_none());
    }

    #[test]
    fn rejects_empty_role_set() {
        let mut t = RouteTable::builtin();
        t.routes.push(RouteDescriptor::protected("/orphan", &[]));
        assert_eq!(t.validate().unwrap_err().code_str(), "empty_role_set");
    }

    #[test]
    fn rejects_duplicates() {
        let mut t = RouteTable::builtin();
        t.routes.push(RouteDescriptor::protected("/etudiant/stages/", &[Student]));
        assert_eq!(t.validate().unwrap_err().code_str(), "duplicate_route");
    }

    #[test]
    fn rejects_orphaned_role() {
        let t = RouteTable::new(
            RouteTable::builtin()
                .routes
                .into_iter()
                .filter(|r| !matches!(r.access, Access::Protected(set) if set.contains(Tutor)))
                .collect(),
        );
        assert_eq!(t.validate().unwrap_err().code_str(), "orphaned_role");
    }

    #[test]
    fn rejects_landing_that_excludes_role() {
        let mut t = RouteTable::builtin();
        for r in t.routes.iter_mut() {
            if r.path == "/tuteur/dashboard" {
                r.access = Access::Protected(RoleSet::of(&[Teacher]));
            }
        }
        assert_eq!(t.validate().unwrap_err().code_str(), "bad_landing");
    }

    #[test]
    fn rejects_protected_sign_in() {
        let mut t = RouteTable::builtin();
        for r in t.routes.iter_mut() {
            if r.path == SIGN_IN_PATH {
                r.access = Access::Protected(RoleSet::all());
            }
        }
        assert_eq!(t.validate().unwrap_err().code_str(), "missing_public_page");
    }

    #[test]
    fn json_form_is_readable() {
        let t = RouteTable::builtin();
        let text = serde_json::to_string(&t).unwrap();
        assert!(text.contains(r#""access":"public""#));
        assert!(text.contains(r#""access":{"protected":["student"]}"#));
        assert_eq!(RouteTable::from_json_str(&text).unwrap(), t);
    }
}
