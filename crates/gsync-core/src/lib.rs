//! gsync-core
//!
//! Shared vocabulary for the directory → Grafana membership sync:
//! - [`Role`] with its privilege ordering
//! - rule grammar (`<source>:<org name>:<role>`)
//! - per-(org, role) member buckets used while diffing
//!
//! Deterministic, pure logic. No IO.

mod members;
mod role;
mod rule;

pub use members::{MemberSet, OrgId, OrgRoleKey, UserId};
pub use role::{Role, UnknownRole};
pub use rule::{parse_rule, parse_static_rule, MalformedRule, Rule, StaticRule};

/// Built-in Grafana admin account. Never listed, never synced.
pub const DEFAULT_ADMIN_EMAIL: &str = "admin@localhost";
