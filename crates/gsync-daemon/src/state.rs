//! Shared runtime state for gsync-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The scheduler holds the
//! same `Arc`, so manual and scheduled passes share one guard.

use std::sync::Arc;

use gsync_reconcile::{PassReport, SyncEngine, SyncGuard};
use prometheus::Registry;
use serde::{Deserialize, Serialize};
use tokio::{sync::RwLock, task::JoinHandle};
use tracing::{info, warn};

/// Static build metadata included in health / status responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

pub struct AppState {
    pub build: BuildInfo,
    pub engine: Arc<SyncEngine>,
    pub guard: Arc<SyncGuard>,
    /// Exposed on `/metrics`; the guard's counters are registered into it.
    pub registry: Registry,
    /// Most recent finished pass.
    pub last_report: RwLock<Option<PassReport>>,
    pub interval_ms: u64,
}

impl AppState {
    /// Registers the guard's counters into `registry`.
    pub fn new(
        engine: Arc<SyncEngine>,
        guard: Arc<SyncGuard>,
        registry: Registry,
        interval_ms: u64,
    ) -> prometheus::Result<Self> {
        guard.register(&registry)?;
        Ok(Self {
            build: BuildInfo {
                service: "gsync-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            engine,
            guard,
            registry,
            last_report: RwLock::new(None),
            interval_ms,
        })
    }

    /// Start a pass in the background unless one is in flight.
    ///
    /// `None` means the trigger was dropped.
    pub fn try_trigger(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let permit = self.guard.try_acquire()?;
        let st = Arc::clone(self);
        Some(tokio::spawn(async move {
            let report = st.engine.run(permit).await;
            st.record(report).await;
        }))
    }

    async fn record(&self, report: PassReport) {
        if report.rules_failed > 0 || report.static_rules_failed > 0 || report.failed > 0 {
            warn!(
                pass_id = %report.pass_id,
                outcome = ?report.outcome,
                rules_failed = report.rules_failed,
                static_rules_failed = report.static_rules_failed,
                failed = report.failed,
                "sync pass finished with failures"
            );
        } else {
            info!(
                pass_id = %report.pass_id,
                created = report.created,
                updated = report.updated,
                deleted = report.deleted,
                "sync pass finished"
            );
        }
        *self.last_report.write().await = Some(report);
    }
}
