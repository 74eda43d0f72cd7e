//! In-memory directory: groups map to member lists.
//!
//! A `FakeDirectory` is a cheap handle; clones share state. It is its own
//! [`DirectoryConnector`], so tests keep one clone for seeding and hand
//! another to the resolver.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use gsync_directory::{
    DirectoryApi, DirectoryConnector, DirectoryError, DirectoryMember, DirectoryResult, MemberPage,
};

#[derive(Default)]
struct Groups {
    members: BTreeMap<String, Vec<DirectoryMember>>,
    failing: BTreeSet<String>,
    page_size: Option<usize>,
    listings: Vec<String>,
}

#[derive(Default)]
struct Shared {
    groups: Mutex<Groups>,
    connect_failures: AtomicUsize,
    connects: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct FakeDirectory {
    shared: Arc<Shared>,
}

impl FakeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn groups(&self) -> MutexGuard<'_, Groups> {
        self.shared
            .groups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Define `group` with plain user members.
    pub fn set_group(&self, group: &str, users: &[&str]) {
        self.set_group_members(
            group,
            users.iter().map(|u| DirectoryMember::user(*u)).collect(),
        );
    }

    pub fn set_group_members(&self, group: &str, members: Vec<DirectoryMember>) {
        self.groups().members.insert(group.to_string(), members);
    }

    /// Listings of `group` answer 503.
    pub fn fail_group(&self, group: &str) {
        self.groups().failing.insert(group.to_string());
    }

    /// Split every listing into pages of `size` members.
    pub fn set_page_size(&self, size: usize) {
        self.groups().page_size = Some(size.max(1));
    }

    /// The next `n` connects fail.
    pub fn fail_connects(&self, n: usize) {
        self.shared.connect_failures.store(n, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    /// Groups listed so far, one entry per page.
    pub fn listings(&self) -> Vec<String> {
        self.groups().listings.clone()
    }
}

#[async_trait::async_trait]
impl DirectoryConnector for FakeDirectory {
    async fn connect(&self) -> DirectoryResult<Arc<dyn DirectoryApi>> {
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .shared
            .connect_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(DirectoryError::Config(
                "failed to read credentials .credentials.json".to_string(),
            ));
        }
        let api: Arc<dyn DirectoryApi> = Arc::new(self.clone());
        Ok(api)
    }
}

#[async_trait::async_trait]
impl DirectoryApi for FakeDirectory {
    async fn list_members_page(
        &self,
        group_key: &str,
        page_token: Option<&str>,
    ) -> DirectoryResult<MemberPage> {
        let mut groups = self.groups();
        groups.listings.push(group_key.to_string());

        if groups.failing.contains(group_key) {
            return Err(DirectoryError::Api {
                status: 503,
                message: format!("backend error listing {group_key}"),
            });
        }
        let Some(all) = groups.members.get(group_key) else {
            return Err(DirectoryError::Api {
                status: 404,
                message: format!("Resource Not Found: {group_key}"),
            });
        };

        let Some(size) = groups.page_size else {
            return Ok(MemberPage {
                members: all.clone(),
                next_page_token: None,
            });
        };
        let start: usize = match page_token {
            Some(t) => t.parse().map_err(|_| DirectoryError::Api {
                status: 400,
                message: format!("invalid page token {t}"),
            })?,
            None => 0,
        };
        let end = (start + size).min(all.len());
        Ok(MemberPage {
            members: all.get(start..end).unwrap_or_default().to_vec(),
            next_page_token: (end < all.len()).then(|| end.to_string()),
        })
    }
}
