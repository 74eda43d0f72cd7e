//! Periodic pass trigger.

use std::sync::Arc;
use std::time::Duration;

use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, info};

use crate::state::AppState;

/// Trigger a pass every `period`, starting immediately.
///
/// Ticks that land while a pass is in flight are dropped. The loop exits once
/// `shutdown` flips to `true` or its sender goes away; a pass already running
/// is not waited for.
pub fn spawn_scheduler(
    state: Arc<AppState>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if state.try_trigger().is_none() {
                        debug!("scheduled sync skipped, pass in flight");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("scheduler stopped");
    })
}
