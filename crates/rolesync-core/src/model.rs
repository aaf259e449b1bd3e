//! Domain records exchanged between the roster cache, the roster client
//! and the reconciliation engine.

use crate::ids::{ChannelId, GroupId, MemberId, RoleId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// One managed group: which role tracks the group's tag, and where to
/// report changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupConfig {
    /// The group whose members are reconciled. Unique across configs.
    pub group_id: GroupId,
    /// Role granted to members whose tag points at `group_id`.
    pub target_role_id: RoleId,
    /// Optional channel that receives a summary of each pass's changes.
    #[serde(default)]
    pub audit_sink_id: Option<ChannelId>,
}

impl GroupConfig {
    /// Create a config without an audit sink.
    #[must_use]
    pub fn new(group_id: GroupId, target_role_id: RoleId) -> Self {
        Self {
            group_id,
            target_role_id,
            audit_sink_id: None,
        }
    }

    /// Set the audit sink channel.
    #[must_use]
    pub fn with_audit_sink(mut self, channel_id: ChannelId) -> Self {
        self.audit_sink_id = Some(channel_id);
        self
    }
}

/// A member as seen through the live roster cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub member_id: MemberId,
    pub display_name: String,
    pub current_role_ids: HashSet<RoleId>,
}

impl MemberRecord {
    #[must_use]
    pub fn new(member_id: MemberId, display_name: impl Into<String>) -> Self {
        Self {
            member_id,
            display_name: display_name.into(),
            current_role_ids: HashSet::new(),
        }
    }

    /// Builder helper used when seeding snapshots.
    #[must_use]
    pub fn with_role(mut self, role_id: RoleId) -> Self {
        self.current_role_ids.insert(role_id);
        self
    }

    #[must_use]
    pub fn has_role(&self, role_id: &RoleId) -> bool {
        self.current_role_ids.contains(role_id)
    }
}

/// External per-member tag datum, rebuilt from scratch every pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeRecord {
    pub member_id: MemberId,
    /// The group the member's tag currently advertises, if any.
    pub observed_group_id: Option<GroupId>,
}

impl AttributeRecord {
    /// Whether this member's tag advertises `group_id`.
    #[must_use]
    pub fn belongs_to(&self, group_id: &GroupId) -> bool {
        self.observed_group_id.as_ref() == Some(group_id)
    }
}

/// Direction of a role change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Add,
    Remove,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => f.write_str("add"),
            Self::Remove => f.write_str("remove"),
        }
    }
}

/// An intended or applied role mutation for one member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleChange {
    pub kind: ChangeKind,
    pub member_id: MemberId,
    pub display_name: String,
}

impl RoleChange {
    #[must_use]
    pub fn add(member: &MemberRecord) -> Self {
        Self {
            kind: ChangeKind::Add,
            member_id: member.member_id.clone(),
            display_name: member.display_name.clone(),
        }
    }

    #[must_use]
    pub fn remove(member: &MemberRecord) -> Self {
        Self {
            kind: ChangeKind::Remove,
            member_id: member.member_id.clone(),
            display_name: member.display_name.clone(),
        }
    }
}
