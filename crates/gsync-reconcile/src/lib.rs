//! gsync-reconcile
//!
//! Reconciliation of Grafana org memberships against directory groups.
//!
//! - [`SyncEngine`] runs passes: cache, creates/updates, static rules, deletes.
//! - [`SyncGuard`] keeps passes from overlapping and owns the pass counters.
//! - [`precedence`] decides whether a role write happens at all.
//!
//! All IO goes through `gsync-directory` and `gsync-grafana` traits.

mod engine;
mod guard;
pub mod precedence;
mod types;

pub use engine::SyncEngine;
pub use guard::{PassPermit, SyncGuard, FAILURE_COUNTER, SUCCESS_COUNTER};
pub use types::*;
