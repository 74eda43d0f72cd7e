//! Response types for gsync-daemon HTTP endpoints.
//!
//! No business logic lives here.

use gsync_reconcile::{PassPhase, PassReport, SyncMode};
use serde::Serialize;

// ---------------------------------------------------------------------------
// /healthz
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always "UP" while the process serves requests.
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// /v1/status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub running: bool,
    pub phase: PassPhase,
    pub mode: SyncMode,
    pub interval_ms: u64,
    pub rules: usize,
    pub static_rules: usize,
    pub successes: u64,
    pub failures: u64,
    pub last_pass: Option<PassReport>,
}

// ---------------------------------------------------------------------------
// /v1/sync
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct TriggerAccepted {
    pub accepted: bool,
}

/// Body of the `409` returned while a pass is in flight.
#[derive(Debug, Clone, Serialize)]
pub struct TriggerRefused {
    pub error: String,
    pub phase: PassPhase,
}
