//! Collaborator seams of the engine.
//!
//! Production wiring uses the platform client; tests substitute fakes.

use async_trait::async_trait;
use rolesync_client::models::CreateMessage;
use rolesync_client::{PlatformClient, PlatformResult, RosterClient, RosterFetch};
use rolesync_core::{ChannelId, GroupId, MemberId, RoleId};

/// Member records and identity tags for a group, from one listing walk.
#[async_trait]
pub trait RosterSource: Send + Sync {
    async fn fetch_roster(&self, group_id: &GroupId) -> RosterFetch;
}

#[async_trait]
impl RosterSource for RosterClient {
    async fn fetch_roster(&self, group_id: &GroupId) -> RosterFetch {
        RosterClient::fetch_roster(self, group_id).await
    }
}

/// Per-member role mutations. Both calls are idempotent on the platform.
#[async_trait]
pub trait RoleMutator: Send + Sync {
    async fn add_role(&self, group_id: &GroupId, member_id: &MemberId, role_id: &RoleId)
        -> PlatformResult<()>;

    async fn remove_role(
        &self,
        group_id: &GroupId,
        member_id: &MemberId,
        role_id: &RoleId,
    ) -> PlatformResult<()>;
}

#[async_trait]
impl RoleMutator for PlatformClient {
    async fn add_role(
        &self,
        group_id: &GroupId,
        member_id: &MemberId,
        role_id: &RoleId,
    ) -> PlatformResult<()> {
        self.add_member_role(group_id, member_id, role_id).await
    }

    async fn remove_role(
        &self,
        group_id: &GroupId,
        member_id: &MemberId,
        role_id: &RoleId,
    ) -> PlatformResult<()> {
        self.remove_member_role(group_id, member_id, role_id).await
    }
}

/// Outbound structured message delivery.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn post_message(&self, channel_id: &ChannelId, message: &CreateMessage)
        -> PlatformResult<()>;
}

#[async_trait]
impl MessageSink for PlatformClient {
    async fn post_message(
        &self,
        channel_id: &ChannelId,
        message: &CreateMessage,
    ) -> PlatformResult<()> {
        self.create_message(channel_id, message).await.map(|_| ())
    }
}
