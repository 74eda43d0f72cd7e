//! Role update precedence.
//!
//! Group-derived updates never lower a role. Static rules overwrite
//! whatever is there. Both skip a no-op write.
//!
//! Pure functions, no IO.

use gsync_core::Role;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateDecision {
    Apply,
    /// The member already holds the requested role.
    SkipUnchanged,
    /// The member holds a higher role than requested.
    SkipMorePrivileged,
}

impl UpdateDecision {
    pub fn is_apply(&self) -> bool {
        matches!(self, UpdateDecision::Apply)
    }
}

/// Update decision for a group-derived membership.
///
/// An unknown current role is applied.
pub fn decide_update(current: Option<Role>, requested: Role) -> UpdateDecision {
    match current {
        Some(c) if c == requested => UpdateDecision::SkipUnchanged,
        Some(c) if c > requested => UpdateDecision::SkipMorePrivileged,
        _ => UpdateDecision::Apply,
    }
}

/// Update decision for a static rule. Downgrades are applied.
pub fn decide_static_update(current: Option<Role>, requested: Role) -> UpdateDecision {
    match current {
        Some(c) if c == requested => UpdateDecision::SkipUnchanged,
        _ => UpdateDecision::Apply,
    }
}
