use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Role;

/// Grafana organization id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrgId(pub i64);

/// Grafana user id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for OrgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One bucket of desired/actual members.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrgRoleKey {
    pub org_id: OrgId,
    pub role: Role,
}

impl OrgRoleKey {
    pub fn new(org_id: OrgId, role: Role) -> Self {
        Self { org_id, role }
    }
}

impl fmt::Display for OrgRoleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.org_id, self.role)
    }
}

/// Identities grouped per (org, role).
///
/// Identities are deduplicated per key: two rules feeding the same bucket with
/// overlapping members yield one entry each, so a member never receives two
/// create or delete attempts in one pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MemberSet {
    buckets: BTreeMap<OrgRoleKey, BTreeSet<String>>,
}

impl MemberSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `members` into the bucket for `key`, creating it if needed.
    ///
    /// An empty iterator still registers the bucket.
    pub fn extend<I>(&mut self, key: OrgRoleKey, members: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.buckets.entry(key).or_default().extend(members);
    }

    pub fn get(&self, key: &OrgRoleKey) -> Option<&BTreeSet<String>> {
        self.buckets.get(key)
    }

    pub fn contains(&self, key: &OrgRoleKey, identity: &str) -> bool {
        self.buckets
            .get(key)
            .is_some_and(|members| members.contains(identity))
    }

    /// True if `identity` sits in any bucket of `org_id`, whatever the role.
    pub fn contains_in_org(&self, org_id: OrgId, identity: &str) -> bool {
        self.buckets
            .iter()
            .any(|(k, members)| k.org_id == org_id && members.contains(identity))
    }

    /// Remove `identity` from every bucket of `org_id`.
    pub fn remove_from_org(&mut self, org_id: OrgId, identity: &str) -> usize {
        self.buckets
            .iter_mut()
            .filter(|(k, _)| k.org_id == org_id)
            .filter(|(_, members)| members.contains(identity))
            .map(|(_, members)| members.remove(identity))
            .count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OrgRoleKey, &BTreeSet<String>)> {
        self.buckets.iter()
    }

    /// The highest role each identity holds per org.
    ///
    /// An identity in several buckets of one org collapses to a single entry.
    pub fn highest_roles(&self) -> BTreeMap<(OrgId, &str), Role> {
        let mut out: BTreeMap<(OrgId, &str), Role> = BTreeMap::new();
        for (key, members) in &self.buckets {
            for identity in members {
                out.entry((key.org_id, identity.as_str()))
                    .and_modify(|role| *role = (*role).max(key.role))
                    .or_insert(key.role);
            }
        }
        out
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Total identities across all buckets.
    pub fn member_count(&self) -> usize {
        self.buckets.values().map(BTreeSet::len).sum()
    }
}
