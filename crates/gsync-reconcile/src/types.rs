use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use gsync_core::{MalformedRule, Role};
use gsync_directory::DirectoryError;
use gsync_grafana::GrafanaError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Whether stale memberships are removed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    /// Create, update and delete.
    #[default]
    Sync,
    /// Create and update only.
    UpsertOnly,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Sync => "sync",
            SyncMode::UpsertOnly => "upsert-only",
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnknownMode(pub String);

impl fmt::Display for UnknownMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown mode '{}'. expected one of: sync | upsert-only", self.0)
    }
}

impl std::error::Error for UnknownMode {}

impl FromStr for SyncMode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sync" => Ok(SyncMode::Sync),
            "upsert-only" => Ok(SyncMode::UpsertOnly),
            other => Err(UnknownMode(other.to_string())),
        }
    }
}

/// Everything a pass needs besides its collaborators.
///
/// Rules are kept as raw text and parsed on every pass, so a malformed rule
/// is reported (and counted) each time it would have run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncSettings {
    pub rules: Vec<String>,
    pub static_rules: Vec<String>,
    pub mode: SyncMode,
    /// Members currently holding this role are never deleted.
    pub exclude_role: Option<Role>,
}

// ---------------------------------------------------------------------------
// Phases
// ---------------------------------------------------------------------------

/// Where a pass currently is. Phases never overlap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassPhase {
    Idle,
    BuildingCache,
    ApplyingCreatesUpdates,
    ApplyingStaticRules,
    ApplyingDeletes,
}

impl PassPhase {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            PassPhase::Idle => 0,
            PassPhase::BuildingCache => 1,
            PassPhase::ApplyingCreatesUpdates => 2,
            PassPhase::ApplyingStaticRules => 3,
            PassPhase::ApplyingDeletes => 4,
        }
    }

    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            1 => PassPhase::BuildingCache,
            2 => PassPhase::ApplyingCreatesUpdates,
            3 => PassPhase::ApplyingStaticRules,
            4 => PassPhase::ApplyingDeletes,
            _ => PassPhase::Idle,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a single rule failed. Never fatal to the pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RuleError {
    Malformed(MalformedRule),
    Grafana(GrafanaError),
    Directory(DirectoryError),
}

impl fmt::Display for RuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleError::Malformed(e) => write!(f, "{e}"),
            RuleError::Grafana(e) => write!(f, "{e}"),
            RuleError::Directory(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for RuleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RuleError::Malformed(e) => Some(e),
            RuleError::Grafana(e) => Some(e),
            RuleError::Directory(e) => Some(e),
        }
    }
}

impl From<MalformedRule> for RuleError {
    fn from(e: MalformedRule) -> Self {
        RuleError::Malformed(e)
    }
}

impl From<GrafanaError> for RuleError {
    fn from(e: GrafanaError) -> Self {
        RuleError::Grafana(e)
    }
}

impl From<DirectoryError> for RuleError {
    fn from(e: DirectoryError) -> Self {
        RuleError::Directory(e)
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassOutcome {
    Completed,
    /// The pass panicked; counted as one failure.
    Aborted,
}

/// What one pass did. Counters are per identity unless named per rule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub pass_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: PassOutcome,
    pub mode: SyncMode,

    pub rules_succeeded: u64,
    pub rules_failed: u64,
    pub static_rules_failed: u64,

    pub created: u64,
    pub updated: u64,
    pub deleted: u64,
    /// Already correct, more privileged, or protected by the exclude role.
    pub unchanged: u64,
    /// Not (yet) a Grafana user.
    pub skipped: u64,
    /// A Grafana call failed for this identity.
    pub failed: u64,
}

impl PassReport {
    pub(crate) fn new(pass_id: Uuid, mode: SyncMode) -> Self {
        let now = Utc::now();
        Self {
            pass_id,
            started_at: now,
            finished_at: now,
            outcome: PassOutcome::Completed,
            mode,
            rules_succeeded: 0,
            rules_failed: 0,
            static_rules_failed: 0,
            created: 0,
            updated: 0,
            deleted: 0,
            unchanged: 0,
            skipped: 0,
            failed: 0,
        }
    }

    /// Total create, update and delete calls that succeeded.
    pub fn mutations(&self) -> u64 {
        self.created + self.updated + self.deleted
    }

    pub(crate) fn tally(&mut self, applied: Applied) {
        match applied {
            Applied::Created => self.created += 1,
            Applied::Updated => self.updated += 1,
            Applied::Deleted => self.deleted += 1,
            Applied::Unchanged => self.unchanged += 1,
            Applied::Skipped => self.skipped += 1,
            Applied::Failed => self.failed += 1,
        }
    }
}

/// Result of applying one identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Applied {
    Created,
    Updated,
    Deleted,
    Unchanged,
    Skipped,
    Failed,
}
