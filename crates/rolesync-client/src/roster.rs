//! Paginated bulk member fetch.
//!
//! Walks the member listing with an `after` cursor until a short or empty
//! page. A failed page ends the walk and the partial result is returned
//! with `complete = false`; callers must not infer anything from members
//! that are missing from an incomplete fetch.

use crate::client::PlatformClient;
use crate::error::PlatformResult;
use crate::models::ApiMember;
use async_trait::async_trait;
use rolesync_core::{AttributeRecord, GroupId, MemberId, MemberRecord};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Largest page the member listing accepts.
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Cursor value meaning "from the beginning".
pub const CURSOR_START: &str = "0";

/// One page of the member listing.
#[async_trait]
pub trait MemberSource: Send + Sync {
    async fn list_members_page(
        &self,
        group_id: &GroupId,
        limit: u32,
        after: &str,
    ) -> PlatformResult<Vec<ApiMember>>;
}

#[async_trait]
impl MemberSource for PlatformClient {
    async fn list_members_page(
        &self,
        group_id: &GroupId,
        limit: u32,
        after: &str,
    ) -> PlatformResult<Vec<ApiMember>> {
        PlatformClient::list_members_page(self, group_id, limit, after).await
    }
}

/// Pagination settings.
#[derive(Debug, Clone)]
pub struct RosterConfig {
    /// Members requested per page, clamped to `1..=1000`.
    pub page_size: u32,
    /// Fixed pause between pages, independent of rate-limit headers.
    pub page_delay: Duration,
}

impl Default for RosterConfig {
    fn default() -> Self {
        Self {
            page_size: MAX_PAGE_SIZE,
            page_delay: Duration::from_millis(100),
        }
    }
}

impl RosterConfig {
    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    #[must_use]
    pub fn with_page_delay(mut self, page_delay: Duration) -> Self {
        self.page_delay = page_delay;
        self
    }
}

/// Raw members gathered by one walk.
#[derive(Debug, Clone, Default)]
pub struct MemberFetch {
    pub members: Vec<ApiMember>,
    /// Pages requested, including a failed one.
    pub pages: u32,
    /// `false` when a page failed and the walk stopped early.
    pub complete: bool,
}

/// Attribute map for one group.
#[derive(Debug, Clone, Default)]
pub struct AttributeFetch {
    pub records: HashMap<MemberId, AttributeRecord>,
    pub pages: u32,
    pub complete: bool,
}

impl AttributeFetch {
    #[must_use]
    pub fn get(&self, member_id: &MemberId) -> Option<&AttributeRecord> {
        self.records.get(member_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Member records and tags from a single walk, sharing one `complete` flag.
#[derive(Debug, Clone, Default)]
pub struct RosterFetch {
    pub members: Vec<MemberRecord>,
    pub attributes: AttributeFetch,
}

impl RosterFetch {
    #[must_use]
    pub fn complete(&self) -> bool {
        self.attributes.complete
    }
}

impl From<MemberFetch> for RosterFetch {
    fn from(fetch: MemberFetch) -> Self {
        let members = fetch
            .members
            .iter()
            .filter_map(ApiMember::to_member_record)
            .collect();
        let records = fetch
            .members
            .iter()
            .filter_map(ApiMember::to_attribute_record)
            .map(|record| (record.member_id.clone(), record))
            .collect();
        Self {
            members,
            attributes: AttributeFetch {
                records,
                pages: fetch.pages,
                complete: fetch.complete,
            },
        }
    }
}

/// Paginated roster reader.
#[derive(Clone)]
pub struct RosterClient {
    source: Arc<dyn MemberSource>,
    config: RosterConfig,
}

impl RosterClient {
    #[must_use]
    pub fn new(source: Arc<dyn MemberSource>) -> Self {
        Self {
            source,
            config: RosterConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: RosterConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn config(&self) -> &RosterConfig {
        &self.config
    }

    /// Walk the whole member listing of `group_id`.
    pub async fn fetch_members(&self, group_id: &GroupId) -> MemberFetch {
        let page_size = self.config.page_size.clamp(1, MAX_PAGE_SIZE);
        let mut fetch = MemberFetch {
            complete: true,
            ..Default::default()
        };
        let mut cursor = CURSOR_START.to_string();

        loop {
            if fetch.pages > 0 && !self.config.page_delay.is_zero() {
                tokio::time::sleep(self.config.page_delay).await;
            }
            fetch.pages += 1;

            let page = match self
                .source
                .list_members_page(group_id, page_size, &cursor)
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    warn!(
                        group_id = %group_id,
                        page = fetch.pages,
                        fetched = fetch.members.len(),
                        error = %e,
                        "Member page fetch failed, keeping partial roster"
                    );
                    fetch.complete = false;
                    break;
                }
            };

            let page_len = page.len();
            debug!(group_id = %group_id, page = fetch.pages, members = page_len, "Fetched member page");

            let next_cursor = page
                .iter()
                .rev()
                .find_map(ApiMember::member_id)
                .map(ToString::to_string);
            fetch.members.extend(page);

            if page_len < page_size as usize {
                break;
            }
            match next_cursor {
                Some(next) => cursor = next,
                None => break,
            }
        }

        info!(
            group_id = %group_id,
            members = fetch.members.len(),
            pages = fetch.pages,
            complete = fetch.complete,
            "Member roster fetched"
        );
        fetch
    }

    /// Cache records and tags for every member, from one walk.
    pub async fn fetch_roster(&self, group_id: &GroupId) -> RosterFetch {
        self.fetch_members(group_id).await.into()
    }

    /// Map every fetched member to its observed tag.
    pub async fn fetch_group_attribute_map(&self, group_id: &GroupId) -> AttributeFetch {
        self.fetch_roster(group_id).await.attributes
    }

    /// Roster-cache view of every fetched member.
    pub async fn fetch_member_records(&self, group_id: &GroupId) -> (Vec<MemberRecord>, bool) {
        let fetch = self.fetch_roster(group_id).await;
        let complete = fetch.complete();
        (fetch.members, complete)
    }
}

impl std::fmt::Debug for RosterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RosterClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
