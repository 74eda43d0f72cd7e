//! gsync-testkit
//!
//! In-memory stand-ins for both sides of the sync, used by the scenario tests
//! under `tests/` and by downstream crates' tests. No network I/O.

mod directory;
mod grafana;

pub use directory::FakeDirectory;
pub use grafana::{FakeGrafana, GrafanaCall};
