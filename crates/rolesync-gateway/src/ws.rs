//! Websocket gateway transport.
//!
//! Speaks the platform's gateway protocol (JSON encoding, version 10):
//! hello, identify or resume, heartbeats with acknowledgement tracking, and
//! dispatch decoding into [`GatewayEvent`]s.

use crate::error::ConnectionError;
use crate::event::{GatewayEvent, SessionToken};
use crate::transport::{GatewaySession, GatewayTransport};
use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use rolesync_client::models::{ApiChannel, ApiMember, ApiRole};
use rolesync_client::PlatformClient;
use rolesync_core::{ChannelId, GroupId, MemberId, RoleId};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, trace, warn};

pub const GATEWAY_VERSION: &str = "10";

/// `GUILDS | GUILD_MEMBERS`
pub const DEFAULT_INTENTS: u64 = (1 << 0) | (1 << 1);

const HELLO_TIMEOUT: Duration = Duration::from_secs(10);
const EVENT_BUFFER: usize = 256;

// ── Opcodes ───────────────────────────────────────────────────────────

const OP_DISPATCH: u8 = 0;
const OP_HEARTBEAT: u8 = 1;
const OP_IDENTIFY: u8 = 2;
const OP_RESUME: u8 = 6;
const OP_RECONNECT: u8 = 7;
const OP_INVALID_SESSION: u8 = 9;
const OP_HELLO: u8 = 10;
const OP_HEARTBEAT_ACK: u8 = 11;

#[derive(Debug, Deserialize)]
struct GatewayPayload {
    op: u8,
    #[serde(default)]
    d: Value,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

/// Close codes after which the session cannot be resumed.
#[must_use]
pub fn is_resumable_close(code: Option<u16>) -> bool {
    !matches!(
        code,
        Some(1000 | 1001 | 4004 | 4007 | 4009 | 4010 | 4011 | 4012 | 4013 | 4014)
    )
}

/// Websocket implementation of [`GatewayTransport`].
#[derive(Debug, Clone)]
pub struct WsGateway {
    client: PlatformClient,
    intents: u64,
    shard: [u32; 2],
}

impl WsGateway {
    #[must_use]
    pub fn new(client: PlatformClient) -> Self {
        Self {
            client,
            intents: DEFAULT_INTENTS,
            shard: [0, 1],
        }
    }

    #[must_use]
    pub fn with_intents(mut self, intents: u64) -> Self {
        self.intents = intents;
        self
    }

    fn identify_payload(&self) -> Value {
        json!({
            "op": OP_IDENTIFY,
            "d": {
                "token": self.client.token().expose(),
                "intents": self.intents,
                "shard": self.shard,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "rolesync",
                    "device": "rolesync"
                }
            }
        })
    }

    fn resume_payload(&self, token: &SessionToken) -> Value {
        json!({
            "op": OP_RESUME,
            "d": {
                "token": self.client.token().expose(),
                "session_id": token.session_id,
                "seq": token.sequence
            }
        })
    }

    async fn gateway_url(&self, resume: Option<&SessionToken>) -> Result<url::Url, ConnectionError> {
        let base = match resume.and_then(|t| t.resume_url.clone()) {
            Some(url) => url,
            None => self.client.gateway_bot().await?.url,
        };
        let mut url = url::Url::parse(&base)
            .map_err(|e| ConnectionError::Protocol(format!("invalid gateway url '{base}': {e}")))?;
        url.query_pairs_mut()
            .clear()
            .append_pair("v", GATEWAY_VERSION)
            .append_pair("encoding", "json");
        Ok(url)
    }
}

#[async_trait]
impl GatewayTransport for WsGateway {
    async fn connect(&self, resume: Option<SessionToken>) -> Result<GatewaySession, ConnectionError> {
        let url = self.gateway_url(resume.as_ref()).await?;
        debug!(url = %url, resuming = resume.is_some(), "Opening gateway connection");

        let (mut ws, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;

        let hello = tokio::time::timeout(HELLO_TIMEOUT, next_payload(&mut ws))
            .await
            .map_err(|_| ConnectionError::Protocol("no hello received".to_string()))??;
        if hello.op != OP_HELLO {
            return Err(ConnectionError::Protocol(format!(
                "expected hello, got opcode {}",
                hello.op
            )));
        }
        let interval_ms = hello
            .d
            .get("heartbeat_interval")
            .and_then(Value::as_u64)
            .ok_or_else(|| ConnectionError::Protocol("hello without heartbeat_interval".to_string()))?;

        let (login, sequence) = match &resume {
            Some(token) => (self.resume_payload(token), token.sequence),
            None => (self.identify_payload(), None),
        };
        ws.send(Message::Text(login.to_string())).await?;

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (close_tx, close_rx) = oneshot::channel();
        let driver = Driver {
            events: events_tx,
            sequence,
            heartbeat_interval: Duration::from_millis(interval_ms.max(1)),
            awaiting_ack: false,
            last_heartbeat: None,
        };
        tokio::spawn(driver.run(ws, close_rx));

        Ok(GatewaySession::new(events_rx).with_closer(close_tx))
    }
}

async fn next_payload<W>(ws: &mut W) -> Result<GatewayPayload, ConnectionError>
where
    W: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                return serde_json::from_str(&text)
                    .map_err(|e| ConnectionError::Protocol(format!("malformed payload: {e}")));
            }
            Some(Ok(Message::Close(frame))) => {
                let code = frame.map(|f| u16::from(f.code));
                if code == Some(4004) {
                    return Err(ConnectionError::AuthFailed("authentication failed (4004)".to_string()));
                }
                return Err(ConnectionError::ClosedBeforeReady { code });
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
            None => return Err(ConnectionError::ClosedBeforeReady { code: None }),
        }
    }
}

/// Per-connection task: heartbeats, frame decoding, and close handling.
struct Driver {
    events: mpsc::Sender<GatewayEvent>,
    sequence: Option<u64>,
    heartbeat_interval: Duration,
    awaiting_ack: bool,
    last_heartbeat: Option<Instant>,
}

impl Driver {
    async fn run<W>(mut self, mut ws: W, mut close_rx: oneshot::Receiver<()>)
    where
        W: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin + Send,
    {
        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let (code, resumable) = loop {
            tokio::select! {
                _ = &mut close_rx => {
                    let _ = ws.send(Message::Close(None)).await;
                    break (Some(1000), false);
                }
                _ = heartbeat.tick() => {
                    if self.awaiting_ack {
                        warn!("Heartbeat not acknowledged, dropping connection");
                        let _ = ws.close().await;
                        break (None, true);
                    }
                    if let Err(e) = self.send_heartbeat(&mut ws).await {
                        warn!(error = %e, "Failed to send heartbeat");
                        break (None, true);
                    }
                }
                frame = ws.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        match self.handle_text(&text, &mut ws).await {
                            Ok(None) => {}
                            Ok(Some(end)) => break end,
                            Err(e) => {
                                warn!(error = %e, "Failed to handle gateway payload");
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame.map(|f| u16::from(f.code));
                        break (code, is_resumable_close(code));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "Gateway socket error");
                        break (None, true);
                    }
                    None => break (None, true),
                },
            }
        };

        let _ = self
            .events
            .send(GatewayEvent::Closed {
                code,
                resumable,
                sequence: self.sequence,
            })
            .await;
    }

    async fn send_heartbeat<W>(&mut self, ws: &mut W) -> Result<(), WsError>
    where
        W: Sink<Message, Error = WsError> + Unpin,
    {
        let payload = json!({ "op": OP_HEARTBEAT, "d": self.sequence });
        ws.send(Message::Text(payload.to_string())).await?;
        self.awaiting_ack = true;
        self.last_heartbeat = Some(Instant::now());
        trace!(sequence = ?self.sequence, "Heartbeat sent");
        Ok(())
    }

    /// Handle one text frame. `Some` ends the connection with
    /// `(close code, resumable)`.
    async fn handle_text<W>(
        &mut self,
        text: &str,
        ws: &mut W,
    ) -> Result<Option<(Option<u16>, bool)>, ConnectionError>
    where
        W: Sink<Message, Error = WsError> + Unpin,
    {
        let payload: GatewayPayload = serde_json::from_str(text)
            .map_err(|e| ConnectionError::Protocol(format!("malformed payload: {e}")))?;

        match payload.op {
            OP_DISPATCH => {
                if let Some(seq) = payload.s {
                    self.sequence = Some(seq);
                }
                let Some(name) = payload.t else {
                    return Ok(None);
                };
                match decode_dispatch(&name, payload.d) {
                    Ok(Some(event)) => {
                        if self.events.send(event).await.is_err() {
                            return Ok(Some((Some(1000), false)));
                        }
                    }
                    Ok(None) => trace!(event = %name, "Ignoring dispatch"),
                    Err(e) => warn!(event = %name, error = %e, "Could not decode dispatch"),
                }
            }
            OP_HEARTBEAT => {
                self.send_heartbeat(ws).await?;
            }
            OP_HEARTBEAT_ACK => {
                self.awaiting_ack = false;
                if let Some(sent) = self.last_heartbeat {
                    let _ = self
                        .events
                        .send(GatewayEvent::HeartbeatAck {
                            latency: sent.elapsed(),
                        })
                        .await;
                }
            }
            OP_RECONNECT => {
                debug!("Gateway requested reconnect");
                return Ok(Some((None, true)));
            }
            OP_INVALID_SESSION => {
                let resumable = payload.d.as_bool().unwrap_or(false);
                let _ = self
                    .events
                    .send(GatewayEvent::InvalidSession { resumable })
                    .await;
                return Ok(Some((None, resumable)));
            }
            other => trace!(op = other, "Ignoring opcode"),
        }
        Ok(None)
    }
}

// ── Dispatch decoding ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct IdOnly<T> {
    id: T,
}

#[derive(Debug, Deserialize)]
struct ReadyData {
    session_id: String,
    #[serde(default)]
    resume_gateway_url: Option<String>,
    user: IdOnly<MemberId>,
    #[serde(default)]
    guilds: Vec<IdOnly<GroupId>>,
    #[serde(default)]
    shard: Option<[u32; 2]>,
}

#[derive(Debug, Deserialize)]
struct GuildCreateData {
    id: GroupId,
    #[serde(default)]
    unavailable: bool,
    #[serde(default)]
    roles: Vec<ApiRole>,
    #[serde(default)]
    channels: Vec<ApiChannel>,
    #[serde(default)]
    members: Vec<ApiMember>,
}

#[derive(Debug, Deserialize)]
struct MemberData {
    guild_id: GroupId,
    #[serde(flatten)]
    member: ApiMember,
}

#[derive(Debug, Deserialize)]
struct MemberRemoveData {
    guild_id: GroupId,
    user: IdOnly<MemberId>,
}

#[derive(Debug, Deserialize)]
struct RoleData {
    guild_id: GroupId,
    role: ApiRole,
}

#[derive(Debug, Deserialize)]
struct RoleDeleteData {
    guild_id: GroupId,
    role_id: RoleId,
}

#[derive(Debug, Deserialize)]
struct ChannelDeleteData {
    id: ChannelId,
    #[serde(default)]
    guild_id: Option<GroupId>,
}

/// Decode a dispatch payload. `Ok(None)` for events the cache does not use.
pub fn decode_dispatch(name: &str, data: Value) -> Result<Option<GatewayEvent>, serde_json::Error> {
    let event = match name {
        "READY" => {
            let ready: ReadyData = serde_json::from_value(data)?;
            GatewayEvent::Ready {
                session: SessionToken {
                    session_id: ready.session_id,
                    resume_url: ready.resume_gateway_url,
                    sequence: None,
                },
                user_id: ready.user.id,
                groups: ready.guilds.into_iter().map(|g| g.id).collect(),
                shard: ready.shard.unwrap_or([0, 1]),
            }
        }
        "RESUMED" => GatewayEvent::Resumed,
        "GUILD_CREATE" => {
            let guild: GuildCreateData = serde_json::from_value(data)?;
            if guild.unavailable {
                return Ok(None);
            }
            GatewayEvent::GroupAvailable {
                group_id: guild.id,
                roles: guild.roles,
                channels: guild.channels,
                members: guild
                    .members
                    .iter()
                    .filter_map(ApiMember::to_member_record)
                    .collect(),
            }
        }
        "GUILD_DELETE" => {
            let guild: IdOnly<GroupId> = serde_json::from_value(data)?;
            GatewayEvent::GroupUnavailable { group_id: guild.id }
        }
        "GUILD_MEMBER_ADD" | "GUILD_MEMBER_UPDATE" => {
            let data: MemberData = serde_json::from_value(data)?;
            match data.member.to_member_record() {
                Some(member) => GatewayEvent::MemberUpsert {
                    group_id: data.guild_id,
                    member,
                },
                None => return Ok(None),
            }
        }
        "GUILD_MEMBER_REMOVE" => {
            let data: MemberRemoveData = serde_json::from_value(data)?;
            GatewayEvent::MemberRemove {
                group_id: data.guild_id,
                member_id: data.user.id,
            }
        }
        "GUILD_ROLE_CREATE" | "GUILD_ROLE_UPDATE" => {
            let data: RoleData = serde_json::from_value(data)?;
            GatewayEvent::RoleUpsert {
                group_id: data.guild_id,
                role: data.role,
            }
        }
        "GUILD_ROLE_DELETE" => {
            let data: RoleDeleteData = serde_json::from_value(data)?;
            GatewayEvent::RoleDelete {
                group_id: data.guild_id,
                role_id: data.role_id,
            }
        }
        "CHANNEL_CREATE" | "CHANNEL_UPDATE" => {
            let channel: ApiChannel = serde_json::from_value(data)?;
            match channel.guild_id.clone() {
                Some(group_id) => GatewayEvent::ChannelUpsert { group_id, channel },
                None => return Ok(None),
            }
        }
        "CHANNEL_DELETE" => {
            let data: ChannelDeleteData = serde_json::from_value(data)?;
            match data.guild_id {
                Some(group_id) => GatewayEvent::ChannelDelete {
                    group_id,
                    channel_id: data.id,
                },
                None => return Ok(None),
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(event))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_ready() {
        let event = decode_dispatch(
            "READY",
            json!({
                "v": 10,
                "session_id": "abc",
                "resume_gateway_url": "wss://resume.example.test",
                "user": {"id": "42", "username": "rolesync"},
                "guilds": [{"id": "1", "unavailable": true}, {"id": "2", "unavailable": true}],
                "shard": [0, 1]
            }),
        )
        .unwrap()
        .unwrap();

        match event {
            GatewayEvent::Ready {
                session,
                user_id,
                groups,
                shard,
            } => {
                assert_eq!(session.session_id, "abc");
                assert_eq!(session.resume_url.as_deref(), Some("wss://resume.example.test"));
                assert_eq!(user_id, MemberId::new("42"));
                assert_eq!(groups, vec![GroupId::new("1"), GroupId::new("2")]);
                assert_eq!(shard, [0, 1]);
            }
            other => panic!("Expected Ready, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_guild_create() {
        let event = decode_dispatch(
            "GUILD_CREATE",
            json!({
                "id": "1",
                "roles": [{"id": "5", "name": "Tagged"}],
                "channels": [{"id": "9", "type": 0, "name": "audit"}],
                "members": [{"user": {"id": "10", "username": "alice"}, "roles": ["5"]}]
            }),
        )
        .unwrap()
        .unwrap();

        match event {
            GatewayEvent::GroupAvailable {
                group_id,
                roles,
                channels,
                members,
            } => {
                assert_eq!(group_id, GroupId::new("1"));
                assert_eq!(roles.len(), 1);
                assert_eq!(channels[0].id, ChannelId::new("9"));
                assert!(members[0].has_role(&RoleId::new("5")));
            }
            other => panic!("Expected GroupAvailable, got {other:?}"),
        }
    }

    #[test]
    fn test_unavailable_guild_create_is_ignored() {
        let event = decode_dispatch("GUILD_CREATE", json!({"id": "1", "unavailable": true})).unwrap();
        assert!(event.is_none());
    }

    #[test]
    fn test_decode_member_update() {
        let event = decode_dispatch(
            "GUILD_MEMBER_UPDATE",
            json!({
                "guild_id": "1",
                "user": {"id": "10", "username": "alice", "global_name": "Alice"},
                "nick": null,
                "roles": ["5", "6"]
            }),
        )
        .unwrap()
        .unwrap();

        match event {
            GatewayEvent::MemberUpsert { group_id, member } => {
                assert_eq!(group_id, GroupId::new("1"));
                assert_eq!(member.display_name, "Alice");
                assert_eq!(member.current_role_ids.len(), 2);
            }
            other => panic!("Expected MemberUpsert, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_removals() {
        let event = decode_dispatch(
            "GUILD_MEMBER_REMOVE",
            json!({"guild_id": "1", "user": {"id": "10", "username": "alice"}}),
        )
        .unwrap()
        .unwrap();
        assert!(matches!(event, GatewayEvent::MemberRemove { member_id, .. } if member_id == MemberId::new("10")));

        let event = decode_dispatch("GUILD_ROLE_DELETE", json!({"guild_id": "1", "role_id": "5"}))
            .unwrap()
            .unwrap();
        assert!(matches!(event, GatewayEvent::RoleDelete { role_id, .. } if role_id == RoleId::new("5")));

        let event = decode_dispatch("CHANNEL_DELETE", json!({"id": "9", "type": 1}))
            .unwrap();
        assert!(event.is_none(), "channels outside a group are ignored");
    }

    #[test]
    fn test_unknown_dispatch_is_ignored() {
        assert!(decode_dispatch("MESSAGE_CREATE", json!({})).unwrap().is_none());
    }

    #[test]
    fn test_malformed_dispatch_is_error() {
        assert!(decode_dispatch("GUILD_ROLE_DELETE", json!({"guild_id": "1"})).is_err());
    }

    #[test]
    fn test_resumable_close_codes() {
        assert!(is_resumable_close(None));
        assert!(is_resumable_close(Some(4000)));
        assert!(is_resumable_close(Some(1006)));
        assert!(!is_resumable_close(Some(4004)));
        assert!(!is_resumable_close(Some(4014)));
        assert!(!is_resumable_close(Some(1000)));
    }
}
