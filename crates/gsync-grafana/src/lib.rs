//! gsync-grafana
//!
//! Target side of the sync: Grafana organizations, users and org roles.
//!
//! [`GrafanaApi`] is the boundary the reconcile engine drives. Every method
//! returns a [`GrafanaResult`]; nothing here panics on a bad response.
//! [`GrafanaClient`] is the HTTP implementation.

mod client;

use std::fmt;

use gsync_core::{OrgId, Role, UserId, DEFAULT_ADMIN_EMAIL};
use serde::{Deserialize, Serialize};

pub use client::{GrafanaAuth, GrafanaClient};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Entry of `GET /api/orgs/{orgId}/users`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgUser {
    #[serde(default)]
    pub user_id: i64,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub login: String,
    /// Kept as text: Grafana may report roles outside our enum (e.g. `None`).
    #[serde(default)]
    pub role: String,
}

/// Entry of `GET /api/users/{userId}/orgs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOrg {
    pub org_id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: String,
}

/// Emails of `users` holding exactly `role`.
///
/// The built-in admin account and users without an email are never returned.
pub fn members_with_role(users: &[OrgUser], role: Role) -> Vec<String> {
    users
        .iter()
        .filter(|u| !u.email.is_empty() && u.email != DEFAULT_ADMIN_EMAIL)
        .filter(|u| u.role == role.as_str())
        .map(|u| u.email.clone())
        .collect()
}

/// Role of the single org record matching `org_id`.
///
/// `None` when there are zero or several matching records, or when the role
/// is not one we manage.
pub fn single_org_role(orgs: &[UserOrg], org_id: OrgId) -> Option<Role> {
    let mut matching = orgs.iter().filter(|o| o.org_id == org_id.0);
    let only = matching.next()?;
    if matching.next().is_some() {
        return None;
    }
    only.role.parse().ok()
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors a [`GrafanaApi`] implementation may return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrafanaError {
    /// Org or user lookup found nothing.
    NotFound(String),
    /// Create refused because the user is already in the org.
    AlreadyMember { org_id: OrgId, identity: String },
    /// Grafana answered with another non-success status.
    Api { status: u16, message: String },
    /// Network or transport failure.
    Transport(String),
    /// A response payload could not be decoded.
    Decode(String),
    /// Client misconfiguration (e.g. an unusable base URL).
    Config(String),
}

impl GrafanaError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, GrafanaError::NotFound(_))
    }
}

impl fmt::Display for GrafanaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrafanaError::NotFound(what) => write!(f, "grafana lookup not found: {what}"),
            GrafanaError::AlreadyMember { org_id, identity } => {
                write!(f, "{identity} is already a member of org {org_id}")
            }
            GrafanaError::Api { status, message } => {
                write!(f, "grafana api error status={status}: {message}")
            }
            GrafanaError::Transport(msg) => write!(f, "grafana transport error: {msg}"),
            GrafanaError::Decode(msg) => write!(f, "grafana decode error: {msg}"),
            GrafanaError::Config(msg) => write!(f, "grafana config error: {msg}"),
        }
    }
}

impl std::error::Error for GrafanaError {}

pub type GrafanaResult<T> = Result<T, GrafanaError>;

// ---------------------------------------------------------------------------
// Boundary trait
// ---------------------------------------------------------------------------

/// Grafana administrative operations needed by the sync.
///
/// Calls are independent: a failure of one never affects another in flight.
#[async_trait::async_trait]
pub trait GrafanaApi: Send + Sync {
    async fn find_org_id(&self, name: &str) -> GrafanaResult<OrgId>;

    /// Emails of org members whose role is exactly `role`, minus the
    /// built-in admin account.
    async fn list_org_members(&self, org_id: OrgId, role: Role) -> GrafanaResult<Vec<String>>;

    async fn find_user_id(&self, identity: &str) -> GrafanaResult<UserId>;

    /// `Ok(None)` when membership in `org_id` is absent or ambiguous.
    async fn get_user_role(&self, user_id: UserId, org_id: OrgId) -> GrafanaResult<Option<Role>>;

    /// Only succeeds for identities that already exist as Grafana users.
    async fn create_membership(&self, org_id: OrgId, identity: &str, role: Role)
        -> GrafanaResult<()>;

    async fn update_membership_role(
        &self,
        org_id: OrgId,
        user_id: UserId,
        role: Role,
    ) -> GrafanaResult<()>;

    async fn delete_membership(&self, org_id: OrgId, user_id: UserId) -> GrafanaResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(email: &str, role: &str) -> OrgUser {
        OrgUser {
            user_id: 1,
            email: email.to_string(),
            login: email.to_string(),
            role: role.to_string(),
        }
    }

    fn org(org_id: i64, role: &str) -> UserOrg {
        UserOrg {
            org_id,
            name: format!("org-{org_id}"),
            role: role.to_string(),
        }
    }

    #[test]
    fn members_with_role_filters_role_sentinel_and_blank() {
        let users = vec![
            user("admin@localhost", "Admin"),
            user("a@co.com", "Admin"),
            user("b@co.com", "Editor"),
            user("", "Admin"),
        ];
        assert_eq!(members_with_role(&users, Role::Admin), vec!["a@co.com"]);
        assert_eq!(members_with_role(&users, Role::Editor), vec!["b@co.com"]);
        assert!(members_with_role(&users, Role::Viewer).is_empty());
    }

    #[test]
    fn single_org_role_requires_exactly_one_record() {
        assert_eq!(
            single_org_role(&[org(1, "Editor"), org(2, "Admin")], OrgId(1)),
            Some(Role::Editor)
        );
        assert_eq!(single_org_role(&[org(2, "Admin")], OrgId(1)), None);
        assert_eq!(
            single_org_role(&[org(1, "Editor"), org(1, "Admin")], OrgId(1)),
            None
        );
    }

    #[test]
    fn single_org_role_ignores_unmanaged_roles() {
        assert_eq!(single_org_role(&[org(1, "None")], OrgId(1)), None);
    }

    #[test]
    fn wire_types_decode_grafana_payloads() {
        let users: Vec<OrgUser> = serde_json::from_str(
            r#"[{"orgId":1,"userId":7,"email":"a@co.com","login":"a","role":"Viewer","lastSeenAt":"2024-01-01T00:00:00Z"}]"#,
        )
        .unwrap();
        assert_eq!(users[0].user_id, 7);
        assert_eq!(users[0].role, "Viewer");

        let orgs: Vec<UserOrg> =
            serde_json::from_str(r#"[{"orgId":3,"name":"Main","role":"Admin"}]"#).unwrap();
        assert_eq!(single_org_role(&orgs, OrgId(3)), Some(Role::Admin));
    }
}
