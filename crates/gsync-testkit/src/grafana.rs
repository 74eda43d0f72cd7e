//! Deterministic in-memory Grafana.
//!
//! Orgs, users and memberships live in ordered maps; ids are handed out from
//! counters starting at 1. Every call is recorded, read-only ones included,
//! so tests can assert exactly what the engine asked for.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use gsync_core::{OrgId, Role, UserId};
use gsync_grafana::{
    members_with_role, single_org_role, GrafanaApi, GrafanaError, GrafanaResult, OrgUser, UserOrg,
};
use tokio::sync::Semaphore;

/// One recorded call against [`FakeGrafana`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GrafanaCall {
    FindOrg { name: String },
    ListMembers { org_id: OrgId, role: Role },
    FindUser { identity: String },
    GetRole { user_id: UserId, org_id: OrgId },
    Create { org_id: OrgId, identity: String, role: Role },
    Update { org_id: OrgId, user_id: UserId, role: Role },
    Delete { org_id: OrgId, user_id: UserId },
}

impl GrafanaCall {
    /// Create, update and delete. Everything else only reads.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            GrafanaCall::Create { .. } | GrafanaCall::Update { .. } | GrafanaCall::Delete { .. }
        )
    }
}

#[derive(Default)]
struct State {
    next_org: i64,
    next_user: i64,
    orgs: BTreeMap<String, OrgId>,
    users: BTreeMap<String, UserId>,
    memberships: BTreeMap<OrgId, BTreeMap<UserId, Role>>,
    /// Memberships whose role lookup answers "unknown".
    hidden_roles: BTreeSet<(OrgId, UserId)>,
    failures: Vec<Injected>,
    calls: Vec<GrafanaCall>,
}

/// A failure armed for calls equal to `call`.
struct Injected {
    call: GrafanaCall,
    /// 1-based occurrence to fail. `None` fails every occurrence.
    nth: Option<usize>,
    error: GrafanaError,
}

impl State {
    fn org(&mut self, name: &str) -> OrgId {
        if let Some(id) = self.orgs.get(name) {
            return *id;
        }
        self.next_org += 1;
        let id = OrgId(self.next_org);
        self.orgs.insert(name.to_string(), id);
        id
    }

    fn user(&mut self, identity: &str) -> UserId {
        if let Some(id) = self.users.get(identity) {
            return *id;
        }
        self.next_user += 1;
        let id = UserId(self.next_user);
        self.users.insert(identity.to_string(), id);
        id
    }

    fn identity_of(&self, user_id: UserId) -> Option<&str> {
        self.users
            .iter()
            .find(|(_, id)| **id == user_id)
            .map(|(identity, _)| identity.as_str())
    }

    fn org_exists(&self, org_id: OrgId) -> bool {
        self.orgs.values().any(|id| *id == org_id)
    }

    /// Record `call`, then answer with an injected failure if one matches.
    fn record(&mut self, call: GrafanaCall) -> GrafanaResult<()> {
        let seen = self.calls.iter().filter(|c| **c == call).count() + 1;
        let injected = self
            .failures
            .iter()
            .find(|f| f.call == call && f.nth.map_or(true, |n| n == seen))
            .map(|f| f.error.clone());
        self.calls.push(call);
        match injected {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// In-memory [`GrafanaApi`] with call recording and failure injection.
#[derive(Default)]
pub struct FakeGrafana {
    state: Mutex<State>,
    org_lookup_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl FakeGrafana {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // --- seeding -----------------------------------------------------------

    /// Create (or fetch) an org by name.
    pub fn add_org(&self, name: &str) -> OrgId {
        self.state().org(name)
    }

    /// Create (or fetch) a user that is not yet in any org.
    pub fn add_user(&self, identity: &str) -> UserId {
        self.state().user(identity)
    }

    /// Put `identity` into `org` with `role`, creating both on demand.
    pub fn add_member(&self, org: &str, identity: &str, role: Role) -> UserId {
        let mut st = self.state();
        let org_id = st.org(org);
        let user_id = st.user(identity);
        st.memberships.entry(org_id).or_default().insert(user_id, role);
        user_id
    }

    /// Make the role lookup for this membership report "unknown".
    pub fn hide_role(&self, org: &str, identity: &str) {
        let mut st = self.state();
        let org_id = st.org(org);
        let user_id = st.user(identity);
        st.hidden_roles.insert((org_id, user_id));
    }

    /// Answer every call equal to `call` with `error`, recording it first.
    pub fn fail(&self, call: GrafanaCall, error: GrafanaError) {
        self.state().failures.push(Injected {
            call,
            nth: None,
            error,
        });
    }

    /// Answer only the `n`-th call equal to `call` with `error`, counting
    /// from 1 over every call recorded so far.
    pub fn fail_nth(&self, call: GrafanaCall, n: usize, error: GrafanaError) {
        self.state().failures.push(Injected {
            call,
            nth: Some(n),
            error,
        });
    }

    /// Block org lookups until the returned semaphore receives permits.
    ///
    /// Each permit releases one lookup.
    pub fn gate_org_lookups(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self
            .org_lookup_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&gate));
        gate
    }

    // --- inspection --------------------------------------------------------

    pub fn org_id(&self, name: &str) -> Option<OrgId> {
        self.state().orgs.get(name).copied()
    }

    pub fn user_id(&self, identity: &str) -> Option<UserId> {
        self.state().users.get(identity).copied()
    }

    /// Current role of `identity` in `org`, ignoring hidden roles.
    pub fn role_of(&self, org: &str, identity: &str) -> Option<Role> {
        let st = self.state();
        let org_id = st.orgs.get(org)?;
        let user_id = st.users.get(identity)?;
        st.memberships.get(org_id)?.get(user_id).copied()
    }

    /// `identity -> role` for every member of `org`.
    pub fn members_of(&self, org: &str) -> BTreeMap<String, Role> {
        let st = self.state();
        let Some(org_id) = st.orgs.get(org) else {
            return BTreeMap::new();
        };
        st.memberships
            .get(org_id)
            .map(|members| {
                members
                    .iter()
                    .filter_map(|(uid, role)| st.identity_of(*uid).map(|i| (i.to_string(), *role)))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<GrafanaCall> {
        self.state().calls.clone()
    }

    pub fn mutations(&self) -> Vec<GrafanaCall> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.is_mutation())
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    async fn pass_gate(&self) {
        let gate = self
            .org_lookup_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
    }
}

#[async_trait::async_trait]
impl GrafanaApi for FakeGrafana {
    async fn find_org_id(&self, name: &str) -> GrafanaResult<OrgId> {
        self.state().record(GrafanaCall::FindOrg {
            name: name.to_string(),
        })?;
        self.pass_gate().await;
        self.org_id(name)
            .ok_or_else(|| GrafanaError::NotFound(format!("org {name}: Organization not found")))
    }

    async fn list_org_members(&self, org_id: OrgId, role: Role) -> GrafanaResult<Vec<String>> {
        let mut st = self.state();
        st.record(GrafanaCall::ListMembers { org_id, role })?;
        if !st.org_exists(org_id) {
            return Err(GrafanaError::NotFound(format!("org {org_id} users")));
        }
        let users: Vec<OrgUser> = st
            .memberships
            .get(&org_id)
            .map(|members| {
                members
                    .iter()
                    .map(|(uid, r)| OrgUser {
                        user_id: uid.0,
                        email: st.identity_of(*uid).unwrap_or_default().to_string(),
                        login: String::new(),
                        role: r.as_str().to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(members_with_role(&users, role))
    }

    async fn find_user_id(&self, identity: &str) -> GrafanaResult<UserId> {
        let mut st = self.state();
        st.record(GrafanaCall::FindUser {
            identity: identity.to_string(),
        })?;
        st.users
            .get(identity)
            .copied()
            .ok_or_else(|| GrafanaError::NotFound(format!("user {identity}: user not found")))
    }

    async fn get_user_role(&self, user_id: UserId, org_id: OrgId) -> GrafanaResult<Option<Role>> {
        let mut st = self.state();
        st.record(GrafanaCall::GetRole { user_id, org_id })?;
        if st.hidden_roles.contains(&(org_id, user_id)) {
            return Ok(None);
        }
        let orgs: Vec<UserOrg> = st
            .memberships
            .iter()
            .filter_map(|(oid, members)| {
                members.get(&user_id).map(|r| UserOrg {
                    org_id: oid.0,
                    name: String::new(),
                    role: r.as_str().to_string(),
                })
            })
            .collect();
        Ok(single_org_role(&orgs, org_id))
    }

    async fn create_membership(
        &self,
        org_id: OrgId,
        identity: &str,
        role: Role,
    ) -> GrafanaResult<()> {
        let mut st = self.state();
        st.record(GrafanaCall::Create {
            org_id,
            identity: identity.to_string(),
            role,
        })?;
        let Some(user_id) = st.users.get(identity).copied() else {
            return Err(GrafanaError::NotFound(format!(
                "add {identity} to org {org_id}: User not found"
            )));
        };
        let members = st.memberships.entry(org_id).or_default();
        if members.contains_key(&user_id) {
            return Err(GrafanaError::AlreadyMember {
                org_id,
                identity: identity.to_string(),
            });
        }
        members.insert(user_id, role);
        Ok(())
    }

    async fn update_membership_role(
        &self,
        org_id: OrgId,
        user_id: UserId,
        role: Role,
    ) -> GrafanaResult<()> {
        let mut st = self.state();
        st.record(GrafanaCall::Update {
            org_id,
            user_id,
            role,
        })?;
        match st
            .memberships
            .get_mut(&org_id)
            .and_then(|m| m.get_mut(&user_id))
        {
            Some(current) => {
                *current = role;
                Ok(())
            }
            None => Err(GrafanaError::NotFound(format!(
                "update user {user_id} in org {org_id}: User not found"
            ))),
        }
    }

    async fn delete_membership(&self, org_id: OrgId, user_id: UserId) -> GrafanaResult<()> {
        let mut st = self.state();
        st.record(GrafanaCall::Delete { org_id, user_id })?;
        match st.memberships.get_mut(&org_id).and_then(|m| m.remove(&user_id)) {
            Some(_) => Ok(()),
            None => Err(GrafanaError::NotFound(format!(
                "remove user {user_id} from org {org_id}: User not found"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_conflict() {
        let g = FakeGrafana::new();
        let main = g.add_org("Main");
        g.add_user("a@co.com");

        g.create_membership(main, "a@co.com", Role::Viewer).await.unwrap();
        let err = g
            .create_membership(main, "a@co.com", Role::Editor)
            .await
            .unwrap_err();
        assert!(matches!(err, GrafanaError::AlreadyMember { .. }));
        assert_eq!(g.role_of("Main", "a@co.com"), Some(Role::Viewer));
        assert_eq!(g.mutations().len(), 2);
    }

    #[tokio::test]
    async fn create_for_unknown_user_is_not_found() {
        let g = FakeGrafana::new();
        let main = g.add_org("Main");
        let err = g
            .create_membership(main, "ghost@co.com", Role::Viewer)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn listing_uses_grafana_filters() {
        let g = FakeGrafana::new();
        let main = g.add_org("Main");
        g.add_member("Main", "admin@localhost", Role::Admin);
        g.add_member("Main", "a@co.com", Role::Admin);
        g.add_member("Main", "b@co.com", Role::Viewer);

        let admins = g.list_org_members(main, Role::Admin).await.unwrap();
        assert_eq!(admins, vec!["a@co.com".to_string()]);
    }

    #[tokio::test]
    async fn injected_failure_is_recorded_and_returned() {
        let g = FakeGrafana::new();
        g.add_org("Main");
        g.fail(
            GrafanaCall::FindOrg {
                name: "Main".to_string(),
            },
            GrafanaError::Transport("connection reset".to_string()),
        );

        let err = g.find_org_id("Main").await.unwrap_err();
        assert_eq!(err, GrafanaError::Transport("connection reset".to_string()));
        assert_eq!(g.calls().len(), 1);
    }

    #[tokio::test]
    async fn nth_failure_hits_one_occurrence() {
        let g = FakeGrafana::new();
        let main = g.add_org("Main");
        g.fail_nth(
            GrafanaCall::FindOrg {
                name: "Main".to_string(),
            },
            2,
            GrafanaError::Transport("connection reset".to_string()),
        );

        assert_eq!(g.find_org_id("Main").await.unwrap(), main);
        assert!(g.find_org_id("Main").await.is_err());
        assert_eq!(g.find_org_id("Main").await.unwrap(), main);
        assert_eq!(g.calls().len(), 3);
    }

    #[tokio::test]
    async fn hidden_role_reads_as_unknown() {
        let g = FakeGrafana::new();
        let uid = g.add_member("Main", "a@co.com", Role::Editor);
        let main = g.org_id("Main").unwrap();
        g.hide_role("Main", "a@co.com");

        assert_eq!(g.get_user_role(uid, main).await.unwrap(), None);
    }
}
