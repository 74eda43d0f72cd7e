//! Scenario: the scheduler drives passes until shutdown.
//!
//! # Invariants under test
//!
//! 1. The first tick fires immediately and runs a pass.
//! 2. Later ticks run further passes through the same guard.
//! 3. Flipping the shutdown flag stops the loop.
//! 4. Dropping the shutdown sender also stops the loop.

use std::{sync::Arc, time::Duration};

use gsync_core::Role;
use gsync_daemon::{scheduler::spawn_scheduler, state::AppState};
use gsync_directory::GroupResolver;
use gsync_reconcile::{SyncEngine, SyncGuard, SyncSettings};
use gsync_testkit::{FakeDirectory, FakeGrafana};
use prometheus::Registry;
use tokio::sync::watch;

fn state(grafana: &Arc<FakeGrafana>) -> Arc<AppState> {
    let dir = FakeDirectory::new();
    dir.set_group("eng@co.com", &["a@co.com"]);
    let engine = Arc::new(SyncEngine::new(
        Arc::new(GroupResolver::new(Arc::new(dir))),
        grafana.clone(),
        SyncSettings {
            rules: vec!["eng@co.com:Main:Viewer".to_string()],
            ..SyncSettings::default()
        },
    ));
    let guard = Arc::new(SyncGuard::new().unwrap());
    Arc::new(AppState::new(engine, guard, Registry::new(), 20).unwrap())
}

#[tokio::test]
async fn ticks_run_passes_until_shutdown() {
    let grafana = Arc::new(FakeGrafana::new());
    grafana.add_org("Main");
    grafana.add_user("a@co.com");
    let st = state(&grafana);

    let (tx, rx) = watch::channel(false);
    let handle = spawn_scheduler(Arc::clone(&st), Duration::from_millis(20), rx);

    let mut passes = 0;
    for _ in 0..500 {
        passes = st.guard.successes();
        if passes >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(passes >= 2, "expected at least two passes, saw {passes}");
    assert_eq!(grafana.role_of("Main", "a@co.com"), Some(Role::Viewer));

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("scheduler did not stop")
        .unwrap();
}

#[tokio::test]
async fn dropped_sender_stops_the_loop() {
    let grafana = Arc::new(FakeGrafana::new());
    let st = state(&grafana);

    let (tx, rx) = watch::channel(false);
    let handle = spawn_scheduler(st, Duration::from_secs(3600), rx);
    drop(tx);

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("scheduler did not stop")
        .unwrap();
}
