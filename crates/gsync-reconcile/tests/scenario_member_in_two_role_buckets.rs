//! Scenario: one identity is desired under two roles of the same org.
//!
//! # Invariants under test
//!
//! 1. Only the highest desired role is written, whatever the Grafana latency.
//! 2. No lower role is ever written for that identity in the pass.
//! 3. The next pass with unchanged inputs issues no mutation.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use gsync_core::{OrgId, Role, UserId};
use gsync_directory::GroupResolver;
use gsync_grafana::{GrafanaApi, GrafanaResult};
use gsync_reconcile::{SyncEngine, SyncGuard, SyncSettings};
use gsync_testkit::{FakeDirectory, FakeGrafana, GrafanaCall};

/// Delays role reads, and Editor writes longer, so concurrent writers for one
/// membership would land out of order.
struct SlowGrafana(Arc<FakeGrafana>);

#[async_trait]
impl GrafanaApi for SlowGrafana {
    async fn find_org_id(&self, name: &str) -> GrafanaResult<OrgId> {
        self.0.find_org_id(name).await
    }
    async fn list_org_members(&self, org_id: OrgId, role: Role) -> GrafanaResult<Vec<String>> {
        self.0.list_org_members(org_id, role).await
    }
    async fn find_user_id(&self, identity: &str) -> GrafanaResult<UserId> {
        self.0.find_user_id(identity).await
    }
    async fn get_user_role(&self, user_id: UserId, org_id: OrgId) -> GrafanaResult<Option<Role>> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.0.get_user_role(user_id, org_id).await
    }
    async fn create_membership(&self, org_id: OrgId, identity: &str, role: Role) -> GrafanaResult<()> {
        self.0.create_membership(org_id, identity, role).await
    }
    async fn update_membership_role(
        &self,
        org_id: OrgId,
        user_id: UserId,
        role: Role,
    ) -> GrafanaResult<()> {
        if role == Role::Editor {
            tokio::time::sleep(Duration::from_millis(30)).await;
        }
        self.0.update_membership_role(org_id, user_id, role).await
    }
    async fn delete_membership(&self, org_id: OrgId, user_id: UserId) -> GrafanaResult<()> {
        self.0.delete_membership(org_id, user_id).await
    }
}

#[tokio::test]
async fn highest_role_wins_under_latency() {
    let dir = FakeDirectory::new();
    dir.set_group("eng@co.com", &["a@co.com"]);
    dir.set_group("admins@co.com", &["a@co.com"]);
    let grafana = Arc::new(FakeGrafana::new());
    let uid = grafana.add_member("Main", "a@co.com", Role::Viewer);
    let main = grafana.org_id("Main").unwrap();

    let engine = SyncEngine::new(
        Arc::new(GroupResolver::new(Arc::new(dir.clone()))),
        Arc::new(SlowGrafana(grafana.clone())),
        SyncSettings {
            rules: vec![
                "eng@co.com:Main:Editor".to_string(),
                "admins@co.com:Main:Admin".to_string(),
            ],
            ..SyncSettings::default()
        },
    );
    let guard = Arc::new(SyncGuard::new().unwrap());
    engine.run_if_idle(&guard).await.unwrap();

    assert_eq!(grafana.role_of("Main", "a@co.com"), Some(Role::Admin));
    assert_eq!(
        grafana.mutations(),
        vec![
            GrafanaCall::Create {
                org_id: main,
                identity: "a@co.com".to_string(),
                role: Role::Admin,
            },
            GrafanaCall::Update {
                org_id: main,
                user_id: uid,
                role: Role::Admin,
            },
        ]
    );

    grafana.clear_calls();
    let second = engine.run_if_idle(&guard).await.unwrap();
    assert_eq!(grafana.mutations(), Vec::<GrafanaCall>::new());
    assert_eq!(second.mutations(), 0);
    assert_eq!(grafana.role_of("Main", "a@co.com"), Some(Role::Admin));
}
