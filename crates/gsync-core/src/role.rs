use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Grafana organization role.
///
/// Variant order is the privilege order: `Viewer < Editor < Admin`.
/// The derived `Ord` is what update precedence decisions compare.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    Viewer,
    Editor,
    Admin,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Viewer, Role::Editor, Role::Admin];

    /// Exact casing used by the Grafana API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Viewer => "Viewer",
            Role::Editor => "Editor",
            Role::Admin => "Admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A role string that is not one of `Viewer | Editor | Admin`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnknownRole(pub String);

impl fmt::Display for UnknownRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown role '{}'. expected one of: Viewer | Editor | Admin",
            self.0
        )
    }
}

impl std::error::Error for UnknownRole {}

impl FromStr for Role {
    type Err = UnknownRole;

    /// Case-sensitive: `"admin"` is rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| UnknownRole(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn privilege_order_is_viewer_editor_admin() {
        assert!(Role::Viewer < Role::Editor);
        assert!(Role::Editor < Role::Admin);
        assert_eq!(Role::ALL.iter().max(), Some(&Role::Admin));
    }

    #[test]
    fn parse_is_case_sensitive() {
        assert_eq!("Editor".parse::<Role>(), Ok(Role::Editor));
        assert_eq!(
            "editor".parse::<Role>(),
            Err(UnknownRole("editor".to_string()))
        );
        assert!("Edit".parse::<Role>().is_err());
    }

    #[test]
    fn serde_uses_grafana_casing() {
        let json = serde_json::to_string(&Role::Admin).unwrap();
        assert_eq!(json, "\"Admin\"");
        let back: Role = serde_json::from_str("\"Viewer\"").unwrap();
        assert_eq!(back, Role::Viewer);
    }
}
