//! Scenario: org already has members for the synced role.
//!
//! # Invariants under test
//!
//! 1. `sync` mode removes members no rule asks for; present members whose role
//!    already matches are left alone.
//! 2. `upsert-only` mode never deletes.
//! 3. Members holding the excluded role are never deleted.
//! 4. A member desired under another role of the same org is moved, not
//!    deleted.
//! 5. The built-in admin account is never touched.

use std::sync::Arc;

use gsync_core::Role;
use gsync_directory::GroupResolver;
use gsync_reconcile::{SyncEngine, SyncGuard, SyncMode, SyncSettings};
use gsync_testkit::{FakeDirectory, FakeGrafana, GrafanaCall};

fn engine(dir: &FakeDirectory, grafana: &Arc<FakeGrafana>, settings: SyncSettings) -> SyncEngine {
    let resolver = Arc::new(GroupResolver::new(Arc::new(dir.clone())));
    SyncEngine::new(resolver, grafana.clone(), settings)
}

fn settings(rules: &[&str], mode: SyncMode, exclude_role: Option<Role>) -> SyncSettings {
    SyncSettings {
        rules: rules.iter().map(|r| r.to_string()).collect(),
        static_rules: Vec::new(),
        mode,
        exclude_role,
    }
}

/// Group `{a, b}`; Main editors `{a, c}`; `b` has an account but no org.
fn seed() -> (FakeDirectory, Arc<FakeGrafana>) {
    let dir = FakeDirectory::new();
    dir.set_group("eng@co.com", &["a@co.com", "b@co.com"]);
    let grafana = Arc::new(FakeGrafana::new());
    grafana.add_member("Main", "admin@localhost", Role::Admin);
    grafana.add_member("Main", "a@co.com", Role::Editor);
    grafana.add_member("Main", "c@co.com", Role::Editor);
    grafana.add_user("b@co.com");
    (dir, grafana)
}

async fn run(engine: &SyncEngine) {
    engine
        .run_if_idle(&Arc::new(SyncGuard::new().unwrap()))
        .await
        .unwrap();
}

#[tokio::test]
async fn sync_mode_creates_missing_and_deletes_stale() {
    let (dir, grafana) = seed();
    let main = grafana.org_id("Main").unwrap();
    let c = grafana.user_id("c@co.com").unwrap();

    run(&engine(&dir, &grafana, settings(&["eng@co.com:Main:Editor"], SyncMode::Sync, None))).await;

    let mutations = grafana.mutations();
    assert_eq!(
        mutations,
        vec![
            GrafanaCall::Create {
                org_id: main,
                identity: "b@co.com".to_string(),
                role: Role::Editor,
            },
            GrafanaCall::Delete { org_id: main, user_id: c },
        ]
    );
    assert!(!mutations
        .iter()
        .any(|m| matches!(m, GrafanaCall::Update { .. })));
    assert_eq!(grafana.role_of("Main", "c@co.com"), None);
    assert_eq!(grafana.role_of("Main", "admin@localhost"), Some(Role::Admin));
}

#[tokio::test]
async fn upsert_only_mode_never_deletes() {
    let (dir, grafana) = seed();

    run(&engine(
        &dir,
        &grafana,
        settings(&["eng@co.com:Main:Editor"], SyncMode::UpsertOnly, None),
    ))
    .await;

    assert!(!grafana
        .calls()
        .iter()
        .any(|c| matches!(c, GrafanaCall::Delete { .. })));
    assert_eq!(grafana.role_of("Main", "c@co.com"), Some(Role::Editor));
    assert_eq!(grafana.role_of("Main", "b@co.com"), Some(Role::Editor));
}

#[tokio::test]
async fn excluded_role_is_never_deleted() {
    let (dir, grafana) = seed();
    grafana.add_member("Main", "boss@co.com", Role::Admin);
    dir.set_group("admins@co.com", &[]);

    run(&engine(
        &dir,
        &grafana,
        settings(
            &["eng@co.com:Main:Editor", "admins@co.com:Main:Admin"],
            SyncMode::Sync,
            Some(Role::Admin),
        ),
    ))
    .await;

    assert_eq!(grafana.role_of("Main", "boss@co.com"), Some(Role::Admin));
    // Not excluded: still removed.
    assert_eq!(grafana.role_of("Main", "c@co.com"), None);
}

#[tokio::test]
async fn member_desired_under_other_role_is_moved_not_deleted() {
    let dir = FakeDirectory::new();
    dir.set_group("eng@co.com", &["a@co.com"]);
    dir.set_group("readers@co.com", &[]);
    let grafana = Arc::new(FakeGrafana::new());
    grafana.add_member("Main", "a@co.com", Role::Viewer);

    run(&engine(
        &dir,
        &grafana,
        settings(
            &["eng@co.com:Main:Editor", "readers@co.com:Main:Viewer"],
            SyncMode::Sync,
            None,
        ),
    ))
    .await;

    assert_eq!(grafana.role_of("Main", "a@co.com"), Some(Role::Editor));
    assert!(!grafana
        .calls()
        .iter()
        .any(|c| matches!(c, GrafanaCall::Delete { .. })));
}
