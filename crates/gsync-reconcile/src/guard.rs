//! Pass mutual exclusion and pass counters.
//!
//! At most one pass holds a [`PassPermit`] at a time. A trigger that finds a
//! pass in flight is skipped, not queued. The permit releases the guard on
//! drop, so every exit path (panics included) leaves the guard idle.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use prometheus::{IntCounter, Registry};

use crate::PassPhase;

pub const SUCCESS_COUNTER: &str = "grafana_gsuite_sync_success";
pub const FAILURE_COUNTER: &str = "grafana_gsuite_sync_fail";

#[derive(Debug)]
pub struct SyncGuard {
    running: AtomicBool,
    phase: AtomicU8,
    success: IntCounter,
    failure: IntCounter,
}

impl SyncGuard {
    pub fn new() -> prometheus::Result<Self> {
        Ok(Self {
            running: AtomicBool::new(false),
            phase: AtomicU8::new(PassPhase::Idle.as_u8()),
            success: IntCounter::new(SUCCESS_COUNTER, "Successful grafana gsuite sync counter")?,
            failure: IntCounter::new(FAILURE_COUNTER, "Unsuccessful grafana gsuite sync counter")?,
        })
    }

    /// Register both counters with `registry`.
    pub fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.success.clone()))?;
        registry.register(Box::new(self.failure.clone()))?;
        Ok(())
    }

    /// Claim the guard. `false` when a pass is already running.
    pub fn try_start(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Release the guard.
    pub fn finish(&self) {
        self.set_phase(PassPhase::Idle);
        self.running.store(false, Ordering::Release);
    }

    /// RAII form of [`try_start`](Self::try_start).
    pub fn try_acquire(self: &Arc<Self>) -> Option<PassPermit> {
        self.try_start().then(|| PassPermit {
            guard: Arc::clone(self),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> PassPhase {
        PassPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub(crate) fn set_phase(&self, phase: PassPhase) {
        self.phase.store(phase.as_u8(), Ordering::Release);
    }

    pub fn record_success(&self) {
        self.success.inc();
    }

    pub fn record_failure(&self) {
        self.failure.inc();
    }

    pub fn successes(&self) -> u64 {
        self.success.get()
    }

    pub fn failures(&self) -> u64 {
        self.failure.get()
    }
}

/// Proof that the holder runs the only pass in flight.
#[derive(Debug)]
pub struct PassPermit {
    guard: Arc<SyncGuard>,
}

impl PassPermit {
    pub fn guard(&self) -> &SyncGuard {
        &self.guard
    }
}

impl Drop for PassPermit {
    fn drop(&mut self) {
        self.guard.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_start_is_refused_until_finish() {
        let guard = SyncGuard::new().unwrap();
        assert!(guard.try_start());
        assert!(!guard.try_start());
        guard.finish();
        assert!(guard.try_start());
    }

    #[test]
    fn permit_releases_on_drop() {
        let guard = Arc::new(SyncGuard::new().unwrap());
        let permit = guard.try_acquire().unwrap();
        assert!(guard.is_running());
        assert!(guard.try_acquire().is_none());
        drop(permit);
        assert!(!guard.is_running());
        assert!(guard.try_acquire().is_some());
    }

    #[test]
    fn permit_releases_on_panic() {
        let guard = Arc::new(SyncGuard::new().unwrap());
        let g = Arc::clone(&guard);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _permit = g.try_acquire().unwrap();
            g.set_phase(PassPhase::ApplyingDeletes);
            panic!("pass blew up");
        }));
        assert!(result.is_err());
        assert!(!guard.is_running());
        assert_eq!(guard.phase(), PassPhase::Idle);
    }

    #[test]
    fn counters_register_under_expected_names() {
        let guard = SyncGuard::new().unwrap();
        let registry = Registry::new();
        guard.register(&registry).unwrap();
        guard.record_success();
        guard.record_failure();
        guard.record_failure();

        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|mf| mf.get_name().to_string())
            .collect();
        assert!(names.contains(&SUCCESS_COUNTER.to_string()));
        assert!(names.contains(&FAILURE_COUNTER.to_string()));
        assert_eq!(guard.successes(), 1);
        assert_eq!(guard.failures(), 2);
    }
}
