//! Per-pass change summaries posted to a group's audit channel.
//!
//! Delivery is at most once. A sink the bot may not post to is treated as
//! delivered without a log line; any other failure is logged and dropped.

use crate::traits::MessageSink;
use chrono::Utc;
use rolesync_client::models::{CreateMessage, Embed, EmbedField};
use rolesync_core::{ChangeKind, ChannelId, RoleChange};
use std::sync::Arc;
use tracing::{debug, warn};

/// Platform limit on an embed field value, in characters.
pub const FIELD_VALUE_LIMIT: usize = 1024;

const TITLE: &str = "Role sync";
const COLOR_ADDED_ONLY: u32 = 0x2ECC71;
const COLOR_REMOVED_ONLY: u32 = 0xE74C3C;
const COLOR_MIXED: u32 = 0xF1C40F;

/// What happened to one summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Nothing to report; no call was made.
    Skipped,
    Delivered,
    /// The bot lacks permission to post in the sink.
    Forbidden,
    Failed,
}

/// Formats change lists and hands them to a [`MessageSink`].
#[derive(Clone)]
pub struct AuditEmitter {
    sink: Arc<dyn MessageSink>,
}

impl std::fmt::Debug for AuditEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditEmitter").finish_non_exhaustive()
    }
}

impl AuditEmitter {
    #[must_use]
    pub fn new(sink: Arc<dyn MessageSink>) -> Self {
        Self { sink }
    }

    /// Post one summary of `changes` to `channel_id`.
    pub async fn emit(&self, channel_id: &ChannelId, changes: &[RoleChange]) -> Delivery {
        if changes.is_empty() {
            return Delivery::Skipped;
        }

        let message = render(changes);
        match self.sink.post_message(channel_id, &message).await {
            Ok(()) => {
                debug!(channel_id = %channel_id, changes = changes.len(), "Audit summary posted");
                Delivery::Delivered
            }
            Err(e) if e.is_missing_permission() => Delivery::Forbidden,
            Err(e) => {
                warn!(channel_id = %channel_id, error = %e, "Failed to post audit summary");
                Delivery::Failed
            }
        }
    }
}

/// Render a change list as a single embed message.
#[must_use]
pub fn render(changes: &[RoleChange]) -> CreateMessage {
    let added: Vec<&str> = names_of(changes, ChangeKind::Add);
    let removed: Vec<&str> = names_of(changes, ChangeKind::Remove);

    let mut fields = Vec::with_capacity(2);
    if !added.is_empty() {
        fields.push(EmbedField {
            name: "Added".to_string(),
            value: join_within_limit(&added, FIELD_VALUE_LIMIT),
            inline: false,
        });
    }
    if !removed.is_empty() {
        fields.push(EmbedField {
            name: "Removed".to_string(),
            value: join_within_limit(&removed, FIELD_VALUE_LIMIT),
            inline: false,
        });
    }

    let color = match (added.is_empty(), removed.is_empty()) {
        (false, true) => COLOR_ADDED_ONLY,
        (true, false) => COLOR_REMOVED_ONLY,
        _ => COLOR_MIXED,
    };

    CreateMessage {
        content: None,
        embeds: vec![Embed {
            title: Some(TITLE.to_string()),
            description: Some(format!(
                "{} added, {} removed",
                added.len(),
                removed.len()
            )),
            timestamp: Some(Utc::now()),
            color: Some(color),
            fields,
        }],
    }
}

fn names_of(changes: &[RoleChange], kind: ChangeKind) -> Vec<&str> {
    changes
        .iter()
        .filter(|c| c.kind == kind)
        .map(|c| c.display_name.as_str())
        .collect()
}

/// Newline-join `names`, cutting off with `...and N more` once the next
/// name would push the value past `limit` characters.
fn join_within_limit(names: &[&str], limit: usize) -> String {
    let mut out = String::new();
    let mut used = 0usize;

    for (i, name) in names.iter().enumerate() {
        let sep = usize::from(i > 0);
        let cost = sep + name.chars().count();
        let remaining = names.len() - i - 1;
        // Room for the suffix must stay available unless this is the last name.
        let reserve = if remaining == 0 {
            0
        } else {
            suffix(remaining).chars().count() + 1
        };

        if used + cost + reserve > limit {
            let rest = names.len() - i;
            let tail = suffix(rest);
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&tail);
            return out;
        }

        if sep == 1 {
            out.push('\n');
        }
        out.push_str(name);
        used += cost;
    }

    out
}

fn suffix(rest: usize) -> String {
    format!("...and {rest} more")
}
