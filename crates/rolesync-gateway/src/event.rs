//! Events delivered by a gateway session.

use rolesync_client::models::{ApiChannel, ApiRole};
use rolesync_core::{ChannelId, GroupId, MemberId, MemberRecord, RoleId};
use std::time::Duration;

/// What a session needs to resume after a drop.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken {
    pub session_id: String,
    pub resume_url: Option<String>,
    /// Last dispatch sequence seen on the session.
    pub sequence: Option<u64>,
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionToken")
            .field("session_id", &"[REDACTED]")
            .field("resume_url", &self.resume_url)
            .field("sequence", &self.sequence)
            .finish()
    }
}

/// Events from the streaming connection, already decoded.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// Session established; the cache may be populated from here on.
    Ready {
        session: SessionToken,
        user_id: MemberId,
        groups: Vec<GroupId>,
        shard: [u32; 2],
    },
    /// A resumed session replayed missed events.
    Resumed,
    GroupAvailable {
        group_id: GroupId,
        roles: Vec<ApiRole>,
        channels: Vec<ApiChannel>,
        members: Vec<MemberRecord>,
    },
    GroupUnavailable {
        group_id: GroupId,
    },
    MemberUpsert {
        group_id: GroupId,
        member: MemberRecord,
    },
    MemberRemove {
        group_id: GroupId,
        member_id: MemberId,
    },
    RoleUpsert {
        group_id: GroupId,
        role: ApiRole,
    },
    RoleDelete {
        group_id: GroupId,
        role_id: RoleId,
    },
    ChannelUpsert {
        group_id: GroupId,
        channel: ApiChannel,
    },
    ChannelDelete {
        group_id: GroupId,
        channel_id: ChannelId,
    },
    HeartbeatAck {
        latency: Duration,
    },
    /// The platform dropped the session.
    InvalidSession {
        resumable: bool,
    },
    /// The connection ended. `resumable` tells whether the cached session
    /// may be reused.
    Closed {
        code: Option<u16>,
        resumable: bool,
        sequence: Option<u64>,
    },
}
