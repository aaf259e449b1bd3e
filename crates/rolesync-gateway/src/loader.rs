//! Full group loads used by the warm fetch.

use crate::cache::GroupSnapshot;
use async_trait::async_trait;
use chrono::Utc;
use rolesync_client::{PlatformClient, PlatformResult, RosterClient};
use rolesync_core::GroupId;

/// Loads group structure and member lists from the platform.
#[async_trait]
pub trait RosterLoader: Send + Sync {
    /// Roles, channels and members of a group.
    async fn load_group(&self, group_id: &GroupId) -> PlatformResult<GroupSnapshot>;
}

/// [`RosterLoader`] over the REST API.
#[derive(Debug, Clone)]
pub struct RestRosterLoader {
    client: PlatformClient,
    roster: RosterClient,
}

impl RestRosterLoader {
    #[must_use]
    pub fn new(client: PlatformClient, roster: RosterClient) -> Self {
        Self { client, roster }
    }
}

#[async_trait]
impl RosterLoader for RestRosterLoader {
    async fn load_group(&self, group_id: &GroupId) -> PlatformResult<GroupSnapshot> {
        let roles = self.client.guild_roles(group_id).await?;
        let channels = self.client.guild_channels(group_id).await?;
        let (members, _complete) = self.roster.fetch_member_records(group_id).await;

        let mut snapshot = GroupSnapshot::new(group_id.clone());
        snapshot.set_structure(&roles, &channels);
        snapshot.members = members
            .into_iter()
            .map(|m| (m.member_id.clone(), m))
            .collect();
        snapshot.refreshed_at = Some(Utc::now());
        Ok(snapshot)
    }
}
