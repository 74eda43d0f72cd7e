//! One reconciliation pass.
//!
//! Phases run strictly in order, each completing before the next starts:
//!
//! 1. build the desired (directory) and actual (Grafana) member sets, one
//!    rule per task
//! 2. create or update every desired member, once per org at the highest
//!    role any rule grants it
//! 3. apply static rules
//! 4. delete what is left of the actual set (`sync` mode only)
//!
//! Work inside a phase runs concurrently. Tasks return their results and a
//! single writer merges them after the join, so the member sets are never
//! shared mutably. A Grafana call that fails only affects its own identity.

use std::collections::{BTreeMap, BTreeSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use futures_util::FutureExt;
use gsync_core::{
    parse_rule, parse_static_rule, MemberSet, OrgId, OrgRoleKey, Role, StaticRule, UserId,
};
use gsync_directory::GroupResolver;
use gsync_grafana::{GrafanaApi, GrafanaError};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::precedence::{decide_static_update, decide_update, UpdateDecision};
use crate::types::Applied;
use crate::{
    PassOutcome, PassPermit, PassPhase, PassReport, RuleError, SyncGuard, SyncMode, SyncSettings,
};

/// Cache entry produced by one dynamic rule.
struct RuleSnapshot {
    org_name: String,
    key: OrgRoleKey,
    actual: Vec<String>,
    desired: BTreeSet<String>,
}

/// Result of one static rule whose org resolved.
struct StaticOutcome {
    org_id: OrgId,
    applied: Applied,
}

/// Org ids resolved by dynamic rules this pass, by name.
type OrgIds = BTreeMap<String, OrgId>;

pub struct SyncEngine {
    resolver: Arc<GroupResolver>,
    grafana: Arc<dyn GrafanaApi>,
    settings: SyncSettings,
}

impl SyncEngine {
    pub fn new(
        resolver: Arc<GroupResolver>,
        grafana: Arc<dyn GrafanaApi>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            resolver,
            grafana,
            settings,
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Run one pass unless another is in flight. `None` when skipped.
    pub async fn run_if_idle(&self, guard: &Arc<SyncGuard>) -> Option<PassReport> {
        let Some(permit) = guard.try_acquire() else {
            debug!("sync already running, skipping");
            return None;
        };
        Some(self.run(permit).await)
    }

    /// Run one pass and release `permit` afterwards.
    ///
    /// A panic inside the pass is caught, counted as one failure, and
    /// reported as [`PassOutcome::Aborted`].
    pub async fn run(&self, permit: PassPermit) -> PassReport {
        let pass_id = Uuid::new_v4();
        let span = info_span!("sync_pass", pass_id = %pass_id);
        let started_at = Utc::now();

        let outcome = AssertUnwindSafe(self.run_pass(pass_id, permit.guard()))
            .catch_unwind()
            .instrument(span.clone())
            .await;

        let report = match outcome {
            Ok(report) => report,
            Err(_) => {
                permit.guard().record_failure();
                span.in_scope(|| error!("sync pass aborted"));
                let mut report = PassReport::new(pass_id, self.settings.mode);
                report.started_at = started_at;
                report.outcome = PassOutcome::Aborted;
                report
            }
        };
        drop(permit);
        report
    }

    async fn run_pass(&self, pass_id: Uuid, guard: &SyncGuard) -> PassReport {
        let mut report = PassReport::new(pass_id, self.settings.mode);
        info!(
            mode = %self.settings.mode,
            rules = self.settings.rules.len(),
            static_rules = self.settings.static_rules.len(),
            "start sync pass"
        );

        guard.set_phase(PassPhase::BuildingCache);
        let (desired, mut actual, org_ids) = self.build_cache(guard, &mut report).await;
        debug!(
            buckets = desired.bucket_count(),
            desired = desired.member_count(),
            actual = actual.member_count(),
            "member cache built"
        );
        debug!(?desired, ?actual, "member sets before create/update");

        guard.set_phase(PassPhase::ApplyingCreatesUpdates);
        self.apply_creates_updates(&desired, &mut actual, &mut report)
            .await;

        guard.set_phase(PassPhase::ApplyingStaticRules);
        self.apply_static_rules(&org_ids, &mut actual, guard, &mut report)
            .await;
        debug!(?actual, "member sets before delete");

        if self.settings.mode == SyncMode::Sync {
            guard.set_phase(PassPhase::ApplyingDeletes);
            self.apply_deletes(&desired, &actual, &mut report).await;
        }

        report.finished_at = Utc::now();
        info!(
            rules_succeeded = report.rules_succeeded,
            rules_failed = report.rules_failed,
            created = report.created,
            updated = report.updated,
            deleted = report.deleted,
            failed = report.failed,
            "end sync pass"
        );
        report
    }

    // -----------------------------------------------------------------------
    // Phase 1: cache
    // -----------------------------------------------------------------------

    async fn build_cache(
        &self,
        guard: &SyncGuard,
        report: &mut PassReport,
    ) -> (MemberSet, MemberSet, OrgIds) {
        let rules = &self.settings.rules;
        let snapshots = join_all(rules.iter().map(|raw| self.snapshot_rule(raw))).await;

        let mut desired = MemberSet::new();
        let mut actual = MemberSet::new();
        let mut org_ids = OrgIds::new();
        for (raw, snapshot) in rules.iter().zip(snapshots) {
            match snapshot {
                Ok(s) => {
                    debug!(
                        rule = %raw,
                        key = %s.key,
                        desired = s.desired.len(),
                        actual = s.actual.len(),
                        "cached rule"
                    );
                    org_ids.insert(s.org_name, s.key.org_id);
                    actual.extend(s.key, s.actual);
                    desired.extend(s.key, s.desired);
                    guard.record_success();
                    report.rules_succeeded += 1;
                }
                Err(e) => {
                    guard.record_failure();
                    report.rules_failed += 1;
                    error!(rule = %raw, error = %e, "failed to build member cache for rule");
                }
            }
        }
        (desired, actual, org_ids)
    }

    async fn snapshot_rule(&self, raw: &str) -> Result<RuleSnapshot, RuleError> {
        let rule = parse_rule(raw)?;
        let org_id = self.grafana.find_org_id(&rule.org_name).await?;
        let actual = self.grafana.list_org_members(org_id, rule.role).await?;
        let desired = self.resolver.resolve_members(&rule.group).await?;
        Ok(RuleSnapshot {
            org_name: rule.org_name,
            key: OrgRoleKey::new(org_id, rule.role),
            actual,
            desired,
        })
    }

    // -----------------------------------------------------------------------
    // Phase 2: creates and updates
    // -----------------------------------------------------------------------

    async fn apply_creates_updates(
        &self,
        desired: &MemberSet,
        actual: &mut MemberSet,
        report: &mut PassReport,
    ) {
        // One task per membership. Two tasks writing the same membership
        // could land in either order.
        let current: &MemberSet = actual;
        let work: Vec<(OrgRoleKey, &str, bool)> = desired
            .highest_roles()
            .into_iter()
            .map(|((org_id, id), role)| {
                (
                    OrgRoleKey::new(org_id, role),
                    id,
                    current.contains_in_org(org_id, id),
                )
            })
            .collect();

        let results = join_all(
            work.iter()
                .map(|(key, id, present)| self.sync_member(*key, id, *present)),
        )
        .await;

        for ((key, id, _), applied) in work.iter().zip(results) {
            report.tally(applied);
            actual.remove_from_org(key.org_id, id);
        }
    }

    async fn sync_member(&self, key: OrgRoleKey, email: &str, present: bool) -> Applied {
        info!(email, org_id = %key.org_id, role = %key.role, "sync directory member");
        let user_id = match self.lookup_user(email).await {
            Ok(id) => id,
            Err(applied) => return applied,
        };

        if !present {
            match self
                .grafana
                .create_membership(key.org_id, email, key.role)
                .await
            {
                Ok(()) => {
                    info!(email, org_id = %key.org_id, role = %key.role, "added member to org");
                    return Applied::Created;
                }
                Err(GrafanaError::AlreadyMember { .. }) => {
                    debug!(email, org_id = %key.org_id, "already in org with another role, updating");
                }
                Err(e) => {
                    error!(email, org_id = %key.org_id, error = %e, "failed to add member to org");
                    return Applied::Failed;
                }
            }
        }

        self.guarded_update(key, user_id, email).await
    }

    /// Update unless the member already holds the role or a higher one.
    async fn guarded_update(&self, key: OrgRoleKey, user_id: UserId, email: &str) -> Applied {
        let current = match self.grafana.get_user_role(user_id, key.org_id).await {
            Ok(role) => role,
            Err(e) => {
                error!(email, org_id = %key.org_id, error = %e, "failed to get member role");
                return Applied::Failed;
            }
        };
        match decide_update(current, key.role) {
            UpdateDecision::Apply => self.write_role(key.org_id, user_id, email, key.role).await,
            UpdateDecision::SkipUnchanged => {
                debug!(email, org_id = %key.org_id, role = %key.role, "role already set, skipping update");
                Applied::Unchanged
            }
            UpdateDecision::SkipMorePrivileged => {
                debug!(
                    email,
                    org_id = %key.org_id,
                    role = %key.role,
                    current = ?current,
                    "existing role is more privileged, skipping update"
                );
                Applied::Unchanged
            }
        }
    }

    async fn write_role(&self, org_id: OrgId, user_id: UserId, email: &str, role: Role) -> Applied {
        match self
            .grafana
            .update_membership_role(org_id, user_id, role)
            .await
        {
            Ok(()) => {
                info!(email, org_id = %org_id, role = %role, "updated member role");
                Applied::Updated
            }
            Err(e) => {
                error!(email, org_id = %org_id, role = %role, error = %e, "failed to update member role");
                Applied::Failed
            }
        }
    }

    /// Grafana user id, or how the caller should tally the identity.
    async fn lookup_user(&self, email: &str) -> Result<UserId, Applied> {
        match self.grafana.find_user_id(email).await {
            Ok(id) => Ok(id),
            Err(e) if e.is_not_found() => {
                debug!(email, "no grafana user for identity, skipping");
                Err(Applied::Skipped)
            }
            Err(e) => {
                error!(email, error = %e, "failed to get grafana user");
                Err(Applied::Failed)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Phase 3: static rules
    // -----------------------------------------------------------------------

    async fn apply_static_rules(
        &self,
        org_ids: &OrgIds,
        actual: &mut MemberSet,
        guard: &SyncGuard,
        report: &mut PassReport,
    ) {
        let mut rules = Vec::new();
        for raw in &self.settings.static_rules {
            match parse_static_rule(raw) {
                Ok(rule) => rules.push(rule),
                Err(e) => {
                    guard.record_failure();
                    report.static_rules_failed += 1;
                    error!(rule = %raw, error = %e, "failed to apply static rule");
                }
            }
        }

        let outcomes = join_all(rules.iter().map(|rule| self.apply_static_rule(rule))).await;

        for (rule, outcome) in rules.iter().zip(outcomes) {
            match outcome {
                Ok(o) => {
                    actual.remove_from_org(o.org_id, &rule.email);
                    report.tally(o.applied);
                    if o.applied == Applied::Failed {
                        guard.record_failure();
                        report.static_rules_failed += 1;
                    }
                }
                Err(e) => {
                    guard.record_failure();
                    report.static_rules_failed += 1;
                    error!(
                        email = %rule.email,
                        org = %rule.org_name,
                        error = %e,
                        "failed to apply static rule"
                    );
                    // A pinned member stays out of the delete phase even when
                    // only the dynamic side resolved its org.
                    if let Some(org_id) = org_ids.get(&rule.org_name) {
                        if actual.remove_from_org(*org_id, &rule.email) > 0 {
                            warn!(
                                email = %rule.email,
                                org_id = %org_id,
                                "static rule unresolved, keeping member this pass"
                            );
                        }
                    }
                }
            }
        }
    }

    async fn apply_static_rule(&self, rule: &StaticRule) -> Result<StaticOutcome, RuleError> {
        let org_id = self.grafana.find_org_id(&rule.org_name).await?;
        info!(email = %rule.email, org_id = %org_id, role = %rule.role, "sync static rule");

        let applied = match self.lookup_user(&rule.email).await {
            Err(applied) => applied,
            Ok(user_id) => match self
                .grafana
                .create_membership(org_id, &rule.email, rule.role)
                .await
            {
                Ok(()) => Applied::Created,
                Err(e) => {
                    debug!(email = %rule.email, org_id = %org_id, error = %e, "static create refused, overwriting role");
                    self.overwrite_role(org_id, user_id, &rule.email, rule.role)
                        .await
                }
            },
        };

        Ok(StaticOutcome { org_id, applied })
    }

    /// Set the role whatever it currently is. Only an equal role is skipped.
    async fn overwrite_role(&self, org_id: OrgId, user_id: UserId, email: &str, role: Role) -> Applied {
        let current = match self.grafana.get_user_role(user_id, org_id).await {
            Ok(current) => current,
            Err(e) => {
                debug!(email, org_id = %org_id, error = %e, "member role unavailable, overwriting");
                None
            }
        };
        match decide_static_update(current, role) {
            UpdateDecision::Apply => self.write_role(org_id, user_id, email, role).await,
            _ => Applied::Unchanged,
        }
    }

    // -----------------------------------------------------------------------
    // Phase 4: deletes
    // -----------------------------------------------------------------------

    async fn apply_deletes(&self, desired: &MemberSet, actual: &MemberSet, report: &mut PassReport) {
        let work: Vec<(OrgRoleKey, &str)> = actual
            .iter()
            .flat_map(|(key, ids)| ids.iter().map(move |id| (*key, id.as_str())))
            .filter(|(key, id)| {
                let wanted = desired.contains_in_org(key.org_id, id);
                if wanted {
                    debug!(email = %id, org_id = %key.org_id, "desired under another role, keeping");
                }
                !wanted
            })
            .collect();

        let results = join_all(work.iter().map(|(key, id)| self.delete_member(*key, id))).await;
        for applied in results {
            report.tally(applied);
        }
    }

    async fn delete_member(&self, key: OrgRoleKey, email: &str) -> Applied {
        let user_id = match self.lookup_user(email).await {
            Ok(id) => id,
            Err(applied) => return applied,
        };
        let current = match self.grafana.get_user_role(user_id, key.org_id).await {
            Ok(role) => role,
            Err(e) => {
                error!(email, org_id = %key.org_id, error = %e, "failed to get member role");
                return Applied::Failed;
            }
        };
        if current.is_some() && current == self.settings.exclude_role {
            debug!(email, org_id = %key.org_id, role = ?current, "member holds the excluded role, keeping");
            return Applied::Unchanged;
        }

        match self.grafana.delete_membership(key.org_id, user_id).await {
            Ok(()) => {
                info!(email, org_id = %key.org_id, "removed member from org");
                Applied::Deleted
            }
            Err(e) => {
                error!(email, org_id = %key.org_id, error = %e, "failed to remove member from org");
                Applied::Failed
            }
        }
    }
}
