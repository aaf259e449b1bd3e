//! rolesync core types
//!
//! Shared vocabulary for the role reconciliation service:
//!
//! - Strongly typed identifiers ([`GroupId`], [`RoleId`], [`MemberId`], [`ChannelId`], [`PassId`])
//! - Snapshot and diff records ([`MemberRecord`], [`AttributeRecord`], [`RoleChange`])
//! - The per-group configuration seam ([`GroupConfigProvider`])

pub mod ids;
pub mod model;
pub mod provider;

pub use ids::{ChannelId, GroupId, MemberId, ParseIdError, PassId, RoleId};
pub use model::{AttributeRecord, ChangeKind, GroupConfig, MemberRecord, RoleChange};
pub use provider::{
    GroupConfigProvider, InMemoryGroupConfigProvider, ProviderError, ProviderResult,
};
