//! Live roster cache.
//!
//! One snapshot per group, written by the lifecycle manager's event pump,
//! the warm fetch, and the engine's refresh/apply steps.

use chrono::{DateTime, Utc};
use rolesync_client::models::{ApiChannel, ApiRole};
use rolesync_core::{ChangeKind, ChannelId, GroupId, MemberId, MemberRecord, RoleId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Cached view of one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSnapshot {
    pub group_id: GroupId,
    /// Role id to role name.
    pub roles: HashMap<RoleId, String>,
    pub channels: HashSet<ChannelId>,
    pub members: HashMap<MemberId, MemberRecord>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl GroupSnapshot {
    #[must_use]
    pub fn new(group_id: GroupId) -> Self {
        Self {
            group_id,
            roles: HashMap::new(),
            channels: HashSet::new(),
            members: HashMap::new(),
            refreshed_at: None,
        }
    }

    #[must_use]
    pub fn with_role(mut self, role_id: RoleId, name: impl Into<String>) -> Self {
        self.roles.insert(role_id, name.into());
        self
    }

    #[must_use]
    pub fn with_channel(mut self, channel_id: ChannelId) -> Self {
        self.channels.insert(channel_id);
        self
    }

    #[must_use]
    pub fn with_member(mut self, member: MemberRecord) -> Self {
        self.members.insert(member.member_id.clone(), member);
        self
    }

    /// Replace roles and channels from API objects.
    pub fn set_structure(&mut self, roles: &[ApiRole], channels: &[ApiChannel]) {
        self.roles = roles
            .iter()
            .map(|r| (r.id.clone(), r.name.clone()))
            .collect();
        self.channels = channels.iter().map(|c| c.id.clone()).collect();
    }
}

/// Shared per-group roster cache.
#[derive(Debug, Clone, Default)]
pub struct RosterCache {
    groups: Arc<RwLock<HashMap<GroupId, GroupSnapshot>>>,
}

impl RosterCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_group(&self, snapshot: GroupSnapshot) {
        debug!(
            group_id = %snapshot.group_id,
            members = snapshot.members.len(),
            roles = snapshot.roles.len(),
            "Caching group snapshot"
        );
        self.groups
            .write()
            .await
            .insert(snapshot.group_id.clone(), snapshot);
    }

    /// Apply a group announcement from the streaming connection.
    ///
    /// Structure is replaced; members are upserted since announcements may
    /// carry only part of a large roster.
    pub async fn merge_group(
        &self,
        group_id: &GroupId,
        roles: &[ApiRole],
        channels: &[ApiChannel],
        members: Vec<MemberRecord>,
    ) {
        let mut groups = self.groups.write().await;
        let snapshot = groups
            .entry(group_id.clone())
            .or_insert_with(|| GroupSnapshot::new(group_id.clone()));
        snapshot.set_structure(roles, channels);
        for member in members {
            snapshot.members.insert(member.member_id.clone(), member);
        }
    }

    pub async fn remove_group(&self, group_id: &GroupId) {
        self.groups.write().await.remove(group_id);
    }

    pub async fn group(&self, group_id: &GroupId) -> Option<GroupSnapshot> {
        self.groups.read().await.get(group_id).cloned()
    }

    pub async fn has_group(&self, group_id: &GroupId) -> bool {
        self.groups.read().await.contains_key(group_id)
    }

    pub async fn has_role(&self, group_id: &GroupId, role_id: &RoleId) -> bool {
        self.groups
            .read()
            .await
            .get(group_id)
            .is_some_and(|g| g.roles.contains_key(role_id))
    }

    pub async fn has_channel(&self, group_id: &GroupId, channel_id: &ChannelId) -> bool {
        self.groups
            .read()
            .await
            .get(group_id)
            .is_some_and(|g| g.channels.contains(channel_id))
    }

    pub async fn group_ids(&self) -> Vec<GroupId> {
        let mut ids: Vec<GroupId> = self.groups.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Members of a group ordered by member id.
    pub async fn members(&self, group_id: &GroupId) -> Vec<MemberRecord> {
        let groups = self.groups.read().await;
        let mut members: Vec<MemberRecord> = groups
            .get(group_id)
            .map(|g| g.members.values().cloned().collect())
            .unwrap_or_default();
        members.sort_by(|a, b| a.member_id.cmp(&b.member_id));
        members
    }

    /// Total cached members across groups.
    pub async fn member_count(&self) -> usize {
        self.groups
            .read()
            .await
            .values()
            .map(|g| g.members.len())
            .sum()
    }

    /// Install a fetched member list.
    ///
    /// A complete list replaces the cached members. An incomplete one only
    /// upserts what was fetched and keeps the rest.
    pub async fn replace_members(&self, group_id: &GroupId, members: Vec<MemberRecord>, complete: bool) {
        let mut groups = self.groups.write().await;
        let snapshot = groups
            .entry(group_id.clone())
            .or_insert_with(|| GroupSnapshot::new(group_id.clone()));
        if complete {
            snapshot.members.clear();
        }
        for member in members {
            snapshot.members.insert(member.member_id.clone(), member);
        }
        snapshot.refreshed_at = Some(Utc::now());
    }

    pub async fn upsert_member(&self, group_id: &GroupId, member: MemberRecord) {
        if let Some(snapshot) = self.groups.write().await.get_mut(group_id) {
            snapshot.members.insert(member.member_id.clone(), member);
        }
    }

    pub async fn remove_member(&self, group_id: &GroupId, member_id: &MemberId) {
        if let Some(snapshot) = self.groups.write().await.get_mut(group_id) {
            snapshot.members.remove(member_id);
        }
    }

    pub async fn upsert_role(&self, group_id: &GroupId, role: &ApiRole) {
        if let Some(snapshot) = self.groups.write().await.get_mut(group_id) {
            snapshot.roles.insert(role.id.clone(), role.name.clone());
        }
    }

    /// Drop a role from the group and from every member holding it.
    pub async fn remove_role(&self, group_id: &GroupId, role_id: &RoleId) {
        if let Some(snapshot) = self.groups.write().await.get_mut(group_id) {
            snapshot.roles.remove(role_id);
            for member in snapshot.members.values_mut() {
                member.current_role_ids.remove(role_id);
            }
        }
    }

    pub async fn upsert_channel(&self, group_id: &GroupId, channel_id: ChannelId) {
        if let Some(snapshot) = self.groups.write().await.get_mut(group_id) {
            snapshot.channels.insert(channel_id);
        }
    }

    pub async fn remove_channel(&self, group_id: &GroupId, channel_id: &ChannelId) {
        if let Some(snapshot) = self.groups.write().await.get_mut(group_id) {
            snapshot.channels.remove(channel_id);
        }
    }

    /// Reflect an applied role change ahead of the platform's own event.
    pub async fn apply_role_change(
        &self,
        group_id: &GroupId,
        member_id: &MemberId,
        role_id: &RoleId,
        kind: ChangeKind,
    ) {
        let mut groups = self.groups.write().await;
        let Some(member) = groups
            .get_mut(group_id)
            .and_then(|g| g.members.get_mut(member_id))
        else {
            return;
        };
        match kind {
            ChangeKind::Add => {
                member.current_role_ids.insert(role_id.clone());
            }
            ChangeKind::Remove => {
                member.current_role_ids.remove(role_id);
            }
        }
    }

    pub async fn clear(&self) {
        self.groups.write().await.clear();
    }
}
