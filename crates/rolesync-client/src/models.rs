//! Wire shapes of the platform REST API.
//!
//! Everything untyped stays in this module; the rest of the service works
//! with [`MemberRecord`] and [`AttributeRecord`].

use chrono::{DateTime, Utc};
use rolesync_core::{AttributeRecord, ChannelId, GroupId, MemberId, MemberRecord, RoleId};
use serde::{Deserialize, Serialize};

// ── Users & Members ───────────────────────────────────────────────────

/// The user's advertised server tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryGuild {
    #[serde(default)]
    pub identity_guild_id: Option<GroupId>,
    /// `None` means the platform did not say; only an explicit `false`
    /// hides the tag.
    #[serde(default)]
    pub identity_enabled: Option<bool>,
    #[serde(default)]
    pub tag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiUser {
    pub id: MemberId,
    pub username: String,
    #[serde(default)]
    pub global_name: Option<String>,
    #[serde(default)]
    pub bot: bool,
    #[serde(default)]
    pub primary_guild: Option<PrimaryGuild>,
}

impl ApiUser {
    /// The group the user's tag points at, if the tag is shown.
    #[must_use]
    pub fn observed_group_id(&self) -> Option<GroupId> {
        let guild = self.primary_guild.as_ref()?;
        if guild.identity_enabled == Some(false) {
            return None;
        }
        guild.identity_guild_id.clone()
    }
}

/// A group member object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiMember {
    #[serde(default)]
    pub user: Option<ApiUser>,
    #[serde(default)]
    pub nick: Option<String>,
    #[serde(default)]
    pub roles: Vec<RoleId>,
}

impl ApiMember {
    #[must_use]
    pub fn member_id(&self) -> Option<&MemberId> {
        self.user.as_ref().map(|u| &u.id)
    }

    /// Nickname, then global name, then username.
    #[must_use]
    pub fn display_name(&self) -> String {
        if let Some(nick) = self.nick.as_deref().filter(|n| !n.is_empty()) {
            return nick.to_string();
        }
        match &self.user {
            Some(user) => user
                .global_name
                .clone()
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| user.username.clone()),
            None => String::new(),
        }
    }

    /// Roster cache view of the member. `None` for payloads without a user.
    #[must_use]
    pub fn to_member_record(&self) -> Option<MemberRecord> {
        let member_id = self.member_id()?.clone();
        Some(MemberRecord {
            member_id,
            display_name: self.display_name(),
            current_role_ids: self.roles.iter().cloned().collect(),
        })
    }

    #[must_use]
    pub fn to_attribute_record(&self) -> Option<AttributeRecord> {
        let user = self.user.as_ref()?;
        Some(AttributeRecord {
            member_id: user.id.clone(),
            observed_group_id: user.observed_group_id(),
        })
    }
}

/// `GET /users/@me`
#[derive(Debug, Clone, Deserialize)]
pub struct CurrentUser {
    pub id: MemberId,
    pub username: String,
}

// ── Group structure ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiRole {
    pub id: RoleId,
    pub name: String,
    #[serde(default)]
    pub position: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiChannel {
    pub id: ChannelId,
    #[serde(rename = "type", default)]
    pub kind: u8,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub guild_id: Option<GroupId>,
}

// ── Gateway discovery ─────────────────────────────────────────────────

/// `GET /gateway/bot`
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayBotInfo {
    pub url: String,
    #[serde(default = "default_shards")]
    pub shards: u32,
}

fn default_shards() -> u32 {
    1
}

// ── Messages ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
}

/// `POST /channels/{id}/messages` body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageCreated {
    pub id: String,
    pub channel_id: ChannelId,
}

// ── Errors ────────────────────────────────────────────────────────────

/// JSON error body returned with 4xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: Option<u32>,
    #[serde(default)]
    pub message: String,
    /// Present on 429 responses, in seconds.
    #[serde(default)]
    pub retry_after: Option<f64>,
}
