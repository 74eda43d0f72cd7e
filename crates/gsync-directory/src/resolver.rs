use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{DirectoryApi, DirectoryConnector, DirectoryResult, MemberKind};

/// Expands directory groups into flat member sets.
///
/// Owns the directory client. The client is created on first use and kept
/// for later calls; when creating it fails the failure is logged, the call
/// resolves to an empty set, and the next call tries again.
pub struct GroupResolver {
    connector: Arc<dyn DirectoryConnector>,
    client: Mutex<Option<Arc<dyn DirectoryApi>>>,
}

impl GroupResolver {
    pub fn new(connector: Arc<dyn DirectoryConnector>) -> Self {
        Self {
            connector,
            client: Mutex::new(None),
        }
    }

    /// Connected client, connecting if needed. `None` when connecting failed.
    async fn client(&self) -> Option<Arc<dyn DirectoryApi>> {
        // Held across connect so concurrent first calls share one attempt.
        let mut slot = self.client.lock().await;
        if let Some(client) = slot.as_ref() {
            return Some(Arc::clone(client));
        }

        debug!("connecting directory client");
        match self.connector.connect().await {
            Ok(client) => {
                *slot = Some(Arc::clone(&client));
                Some(client)
            }
            Err(e) => {
                warn!(error = %e, "directory client unavailable");
                None
            }
        }
    }

    /// All member emails of `group`, expanding nested groups.
    ///
    /// Each group is listed at most once, so membership cycles terminate.
    /// Nested groups of one depth level are listed concurrently. Any listing
    /// failure fails the whole resolution.
    pub async fn resolve_members(&self, group: &str) -> DirectoryResult<BTreeSet<String>> {
        let Some(client) = self.client().await else {
            return Ok(BTreeSet::new());
        };

        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(group.to_ascii_lowercase());

        let mut members = BTreeSet::new();
        let mut frontier = vec![group.to_string()];

        while !frontier.is_empty() {
            let listings = join_all(
                frontier
                    .iter()
                    .map(|g| list_all_pages(client.as_ref(), g.as_str())),
            )
            .await;

            let mut next = Vec::new();
            for (listed_group, listing) in frontier.iter().zip(listings) {
                for member in listing? {
                    let Some(email) = member.email else {
                        continue;
                    };
                    match member.kind {
                        MemberKind::Group => {
                            if visited.insert(email.to_ascii_lowercase()) {
                                next.push(email);
                            } else {
                                debug!(group = %listed_group, nested = %email, "group already expanded, skipping");
                            }
                        }
                        MemberKind::User | MemberKind::Other => {
                            members.insert(email);
                        }
                    }
                }
            }
            frontier = next;
        }

        debug!(group, count = members.len(), "resolved group members");
        Ok(members)
    }
}

async fn list_all_pages(
    client: &dyn DirectoryApi,
    group: &str,
) -> DirectoryResult<Vec<crate::DirectoryMember>> {
    let mut out = Vec::new();
    let mut token: Option<String> = None;
    loop {
        let page = client.list_members_page(group, token.as_deref()).await?;
        out.extend(page.members);
        match page.next_page_token {
            Some(next) if !next.is_empty() => token = Some(next),
            _ => return Ok(out),
        }
    }
}
