//! Scenario: some external calls fail during a pass.
//!
//! # Invariants under test
//!
//! 1. One rule's org lookup failing does not stop the other rules.
//! 2. A failed directory listing (nested included) drops the whole rule, so
//!    its org/role bucket drives no deletes.
//! 3. A failing create for one identity leaves the others untouched.
//! 4. An unreachable directory degrades to an empty group, and the next pass
//!    reconnects.
//! 5. Each failed rule increments the failure counter exactly once.

use std::sync::Arc;

use gsync_core::Role;
use gsync_directory::{DirectoryMember, GroupResolver};
use gsync_grafana::GrafanaError;
use gsync_reconcile::{SyncEngine, SyncGuard, SyncMode, SyncSettings};
use gsync_testkit::{FakeDirectory, FakeGrafana, GrafanaCall};

fn engine(
    dir: &FakeDirectory,
    grafana: &Arc<FakeGrafana>,
    rules: &[&str],
    mode: SyncMode,
) -> SyncEngine {
    let resolver = Arc::new(GroupResolver::new(Arc::new(dir.clone())));
    let settings = SyncSettings {
        rules: rules.iter().map(|r| r.to_string()).collect(),
        mode,
        ..SyncSettings::default()
    };
    SyncEngine::new(resolver, grafana.clone(), settings)
}

#[tokio::test]
async fn org_lookup_failure_is_isolated() {
    let dir = FakeDirectory::new();
    dir.set_group("eng@co.com", &["a@co.com"]);
    dir.set_group("ops@co.com", &["b@co.com"]);
    let grafana = Arc::new(FakeGrafana::new());
    grafana.add_org("Main");
    grafana.add_org("Ops");
    grafana.add_user("a@co.com");
    grafana.add_user("b@co.com");
    grafana.fail(
        GrafanaCall::FindOrg {
            name: "Ops".to_string(),
        },
        GrafanaError::Transport("connection reset by peer".to_string()),
    );

    let guard = Arc::new(SyncGuard::new().unwrap());
    let report = engine(
        &dir,
        &grafana,
        &["ops@co.com:Ops:Editor", "eng@co.com:Main:Editor"],
        SyncMode::Sync,
    )
    .run_if_idle(&guard)
    .await
    .unwrap();

    assert_eq!(grafana.role_of("Main", "a@co.com"), Some(Role::Editor));
    assert_eq!(grafana.role_of("Ops", "b@co.com"), None);
    assert_eq!(report.rules_succeeded, 1);
    assert_eq!(report.rules_failed, 1);
    assert_eq!(guard.successes(), 1);
    assert_eq!(guard.failures(), 1);
}

#[tokio::test]
async fn failed_listing_drives_no_deletes() {
    let dir = FakeDirectory::new();
    dir.set_group_members(
        "eng@co.com",
        vec![
            DirectoryMember::user("a@co.com"),
            DirectoryMember::group("backend@co.com"),
        ],
    );
    dir.fail_group("backend@co.com");
    let grafana = Arc::new(FakeGrafana::new());
    grafana.add_member("Main", "a@co.com", Role::Editor);
    grafana.add_member("Main", "b@co.com", Role::Editor);

    let guard = Arc::new(SyncGuard::new().unwrap());
    let report = engine(&dir, &grafana, &["eng@co.com:Main:Editor"], SyncMode::Sync)
        .run_if_idle(&guard)
        .await
        .unwrap();

    assert_eq!(grafana.mutations(), Vec::<GrafanaCall>::new());
    assert_eq!(grafana.role_of("Main", "b@co.com"), Some(Role::Editor));
    assert_eq!(report.rules_failed, 1);
    assert_eq!(guard.failures(), 1);
}

#[tokio::test]
async fn failing_create_affects_only_its_identity() {
    let dir = FakeDirectory::new();
    dir.set_group("eng@co.com", &["a@co.com", "b@co.com"]);
    let grafana = Arc::new(FakeGrafana::new());
    let main = grafana.add_org("Main");
    grafana.add_user("a@co.com");
    grafana.add_user("b@co.com");
    grafana.fail(
        GrafanaCall::Create {
            org_id: main,
            identity: "a@co.com".to_string(),
            role: Role::Editor,
        },
        GrafanaError::Api {
            status: 500,
            message: "database is locked".to_string(),
        },
    );

    let report = engine(&dir, &grafana, &["eng@co.com:Main:Editor"], SyncMode::Sync)
        .run_if_idle(&Arc::new(SyncGuard::new().unwrap()))
        .await
        .unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.created, 1);
    assert_eq!(grafana.role_of("Main", "a@co.com"), None);
    assert_eq!(grafana.role_of("Main", "b@co.com"), Some(Role::Editor));
    // No fallback update after a non-conflict failure.
    assert!(!grafana
        .calls()
        .iter()
        .any(|c| matches!(c, GrafanaCall::Update { .. })));
}

#[tokio::test]
async fn unreachable_directory_resolves_empty_then_reconnects() {
    let dir = FakeDirectory::new();
    dir.set_group("eng@co.com", &["a@co.com"]);
    dir.fail_connects(1);
    let grafana = Arc::new(FakeGrafana::new());
    grafana.add_org("Main");
    grafana.add_user("a@co.com");

    let eng = engine(&dir, &grafana, &["eng@co.com:Main:Viewer"], SyncMode::UpsertOnly);
    let guard = Arc::new(SyncGuard::new().unwrap());

    eng.run_if_idle(&guard).await.unwrap();
    assert_eq!(grafana.role_of("Main", "a@co.com"), None);

    eng.run_if_idle(&guard).await.unwrap();
    assert_eq!(grafana.role_of("Main", "a@co.com"), Some(Role::Viewer));
    assert_eq!(dir.connects(), 2);
}
