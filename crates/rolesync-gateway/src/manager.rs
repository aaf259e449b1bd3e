//! Connection lifecycle manager.
//!
//! Owns the single streaming session and exposes a coarse ready gate.
//!
//! - `start()` is re-entrant: concurrent callers attach to the one attempt in
//!   flight through a single-slot `watch` handle, and a ready manager returns
//!   immediately.
//! - Login is retried up to `max_login_attempts` with a fixed backoff. The
//!   wait for the ready signal is bounded separately by `ready_timeout`.
//! - A failed start leaves the manager in `Failed`; the next `start()` begins
//!   a fresh sequence.
//! - After ready, an event pump keeps the roster cache current and
//!   reconnects in the background. The gate stays up while a reconnect is in
//!   progress and drops only if the reconnect gives up.

use crate::cache::RosterCache;
use crate::error::ConnectionError;
use crate::event::{GatewayEvent, SessionToken};
use crate::loader::RosterLoader;
use crate::state::ConnectionState;
use crate::transport::{GatewaySession, GatewayTransport};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rolesync_core::GroupConfigProvider;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};

/// Close code the platform uses for rejected credentials.
const CLOSE_AUTHENTICATION_FAILED: u16 = 4004;

const NO_LATENCY: u64 = u64::MAX;

/// Startup and reconnect tuning.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Login attempts per start sequence.
    pub max_login_attempts: u32,
    /// Pause between failed login attempts.
    pub login_backoff: Duration,
    /// Bound on the wait for the ready signal after authentication.
    pub ready_timeout: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_login_attempts: 3,
            login_backoff: Duration::from_secs(2),
            ready_timeout: Duration::from_secs(30),
        }
    }
}

/// Read side of the ready gate.
pub trait ReadyGate: Send + Sync {
    fn is_ready(&self) -> bool;
}

/// Internal lifecycle callbacks.
#[async_trait]
pub trait LifecycleHook: Send + Sync {
    /// Called once each time a start sequence reaches ready.
    async fn on_ready(&self) {}

    /// Called when a start sequence or a background reconnect gives up.
    async fn on_error(&self, _error: &ConnectionError) {}
}

/// Liveness summary posted by the heartbeat reporter.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub state: String,
    pub ready: bool,
    pub groups: usize,
    pub members: usize,
    pub latency_ms: Option<u64>,
    pub shard: [u32; 2],
    pub reconnects: u32,
    pub ready_since: Option<DateTime<Utc>>,
}

/// Outcome broadcast to every caller attached to one start attempt.
type AttemptOutcome = Option<Result<(), ConnectionError>>;

/// What ended the wait for ready.
enum ReadySignal {
    Ready { session: SessionToken, shard: [u32; 2] },
    Resumed,
}

#[derive(Debug)]
struct Shared {
    state: ConnectionState,
    attempt: Option<watch::Receiver<AttemptOutcome>>,
    session: Option<SessionToken>,
    shard: [u32; 2],
    ready_since: Option<DateTime<Utc>>,
    /// Set when a reconnect gives up; read by a start sequence that was
    /// still warming the cache at the time.
    last_failure: Option<ConnectionError>,
}

/// Lifecycle manager for the single streaming connection.
pub struct ConnectionManager {
    transport: Arc<dyn GatewayTransport>,
    loader: Arc<dyn RosterLoader>,
    provider: Arc<dyn GroupConfigProvider>,
    cache: RosterCache,
    config: LifecycleConfig,
    shared: Mutex<Shared>,
    hooks: RwLock<Vec<Arc<dyn LifecycleHook>>>,
    ready: AtomicBool,
    latency_ms: AtomicU64,
    reconnects: AtomicU32,
    /// Bumped by `shutdown()`; a pump exits once it differs from the value
    /// it started with.
    epoch: watch::Sender<u64>,
}

impl ConnectionManager {
    #[must_use]
    pub fn new(
        transport: Arc<dyn GatewayTransport>,
        loader: Arc<dyn RosterLoader>,
        provider: Arc<dyn GroupConfigProvider>,
        cache: RosterCache,
        config: LifecycleConfig,
    ) -> Self {
        let (epoch, _) = watch::channel(0);
        Self {
            transport,
            loader,
            provider,
            cache,
            config,
            shared: Mutex::new(Shared {
                state: ConnectionState::Disconnected,
                attempt: None,
                session: None,
                shard: [0, 1],
                ready_since: None,
                last_failure: None,
            }),
            hooks: RwLock::new(Vec::new()),
            ready: AtomicBool::new(false),
            latency_ms: AtomicU64::new(NO_LATENCY),
            reconnects: AtomicU32::new(0),
            epoch,
        }
    }

    pub async fn add_hook(&self, hook: Arc<dyn LifecycleHook>) {
        self.hooks.write().await.push(hook);
    }

    #[must_use]
    pub fn cache(&self) -> &RosterCache {
        &self.cache
    }

    #[must_use]
    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub async fn state(&self) -> ConnectionState {
        self.shared.lock().await.state.clone()
    }

    /// Bring the connection up, or join the attempt already in flight.
    pub async fn start(self: &Arc<Self>) -> Result<(), ConnectionError> {
        let mut attempt = {
            let mut shared = self.shared.lock().await;
            if shared.state.is_ready() {
                return Ok(());
            }
            if let Some(rx) = &shared.attempt {
                debug!("Joining start attempt already in progress");
                rx.clone()
            } else {
                let (tx, rx) = watch::channel(None);
                shared.attempt = Some(rx.clone());
                shared.state = ConnectionState::Connecting;

                let this = Arc::clone(self);
                tokio::spawn(async move {
                    this.drive_start(tx).await;
                });
                rx
            }
        };

        let outcome = attempt
            .wait_for(Option::is_some)
            .await
            .map_err(|_| ConnectionError::Abandoned)?;
        let result = match &*outcome {
            Some(result) => result.clone(),
            None => Err(ConnectionError::Abandoned),
        };
        result
    }

    /// Close the connection and lower the gate.
    pub async fn shutdown(&self) {
        info!("Shutting down connection");
        self.epoch.send_modify(|epoch| *epoch += 1);
        let mut shared = self.shared.lock().await;
        self.ready.store(false, Ordering::Release);
        shared.state = ConnectionState::Disconnected;
        shared.ready_since = None;
    }

    pub async fn health(&self) -> HealthSnapshot {
        let (state, shard, ready_since) = {
            let shared = self.shared.lock().await;
            (shared.state.to_string(), shared.shard, shared.ready_since)
        };
        let latency = self.latency_ms.load(Ordering::Relaxed);
        HealthSnapshot {
            state,
            ready: self.is_ready(),
            groups: self.cache.group_ids().await.len(),
            members: self.cache.member_count().await,
            latency_ms: (latency != NO_LATENCY).then_some(latency),
            shard,
            reconnects: self.reconnects.load(Ordering::Relaxed),
            ready_since,
        }
    }

    // ── Start sequence ────────────────────────────────────────────────

    async fn drive_start(self: Arc<Self>, tx: watch::Sender<AttemptOutcome>) {
        let outcome = match self.establish(false).await {
            Ok((session, signal)) => {
                self.record_signal(signal).await;

                let pump = Arc::clone(&self);
                tokio::spawn(async move {
                    pump.run_pump(session).await;
                });

                self.warm_roster().await;

                match self.commit_ready().await {
                    Ok(()) => {
                        info!("Connection ready");
                        let hooks = self.hooks.read().await.clone();
                        for hook in hooks {
                            hook.on_ready().await;
                        }
                        Ok(())
                    }
                    Err(e) => {
                        warn!(error = %e, "Connection lost before ready was committed");
                        Err(e)
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Connection start failed");
                self.mark_failed(&e).await;
                Err(e)
            }
        };

        let mut shared = self.shared.lock().await;
        shared.attempt = None;
        tx.send_replace(Some(outcome));
    }

    /// Raise the gate unless the connection was lost or shut down while the
    /// cache was warming. State and flag change under one lock.
    async fn commit_ready(&self) -> Result<(), ConnectionError> {
        let mut shared = self.shared.lock().await;
        let lost = match &shared.state {
            ConnectionState::Connecting | ConnectionState::Authenticated => None,
            ConnectionState::Failed(reason) => Some(
                shared
                    .last_failure
                    .clone()
                    .unwrap_or_else(|| ConnectionError::Transport(reason.clone())),
            ),
            ConnectionState::Disconnected | ConnectionState::Ready => {
                Some(ConnectionError::Abandoned)
            }
        };
        if let Some(error) = lost {
            return Err(error);
        }

        shared.state = ConnectionState::Ready;
        shared.ready_since = Some(Utc::now());
        shared.last_failure = None;
        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    /// Login loop. With `reconnecting` set the public state is left alone so
    /// observers keep seeing `Ready`.
    async fn establish(
        &self,
        reconnecting: bool,
    ) -> Result<(GatewaySession, ReadySignal), ConnectionError> {
        let max_attempts = self.config.max_login_attempts.max(1);
        let mut last_error = ConnectionError::Abandoned;

        for attempt in 1..=max_attempts {
            if !reconnecting {
                self.set_state(ConnectionState::Connecting).await;
            }
            let resume = self.shared.lock().await.session.clone();
            let resuming = resume.is_some();

            match self.transport.connect(resume).await {
                Ok(mut session) => {
                    if !reconnecting {
                        self.set_state(ConnectionState::Authenticated).await;
                    }
                    let waited = tokio::time::timeout(
                        self.config.ready_timeout,
                        self.wait_for_ready(&mut session),
                    )
                    .await;
                    match waited {
                        Ok(Ok(signal)) => {
                            info!(attempt, resumed = resuming, "Connection authenticated and ready");
                            return Ok((session, signal));
                        }
                        Ok(Err(e)) => {
                            session.close();
                            if resuming {
                                self.shared.lock().await.session = None;
                            }
                            last_error = e;
                        }
                        Err(_) => {
                            session.close();
                            warn!(
                                timeout_secs = self.config.ready_timeout.as_secs(),
                                "Ready signal did not arrive in time"
                            );
                            return Err(ConnectionError::ReadyTimeout(self.config.ready_timeout));
                        }
                    }
                }
                Err(e) => last_error = e,
            }

            warn!(
                attempt,
                max_attempts,
                error = %last_error,
                "Login attempt failed"
            );
            if attempt < max_attempts {
                tokio::time::sleep(self.config.login_backoff).await;
            }
        }

        Err(ConnectionError::LoginFailed {
            attempts: max_attempts,
            last_error: last_error.to_string(),
        })
    }

    async fn wait_for_ready(
        &self,
        gateway: &mut GatewaySession,
    ) -> Result<ReadySignal, ConnectionError> {
        while let Some(event) = gateway.events.recv().await {
            match event {
                GatewayEvent::Ready {
                    session,
                    shard,
                    user_id,
                    groups,
                } => {
                    debug!(user_id = %user_id, groups = groups.len(), "Received ready signal");
                    return Ok(ReadySignal::Ready { session, shard });
                }
                GatewayEvent::Resumed => return Ok(ReadySignal::Resumed),
                GatewayEvent::InvalidSession { .. } => {
                    return Err(ConnectionError::ClosedBeforeReady { code: None });
                }
                GatewayEvent::Closed {
                    code: Some(CLOSE_AUTHENTICATION_FAILED),
                    ..
                } => {
                    return Err(ConnectionError::AuthFailed(
                        "platform closed the connection with code 4004".to_string(),
                    ));
                }
                GatewayEvent::Closed { code, .. } => {
                    return Err(ConnectionError::ClosedBeforeReady { code });
                }
                other => self.apply_event(other).await,
            }
        }
        Err(ConnectionError::ClosedBeforeReady { code: None })
    }

    async fn record_signal(&self, signal: ReadySignal) {
        let mut shared = self.shared.lock().await;
        match signal {
            ReadySignal::Ready { session, shard } => {
                shared.session = Some(session);
                shared.shard = shard;
            }
            ReadySignal::Resumed => debug!("Session resumed"),
        }
    }

    async fn set_state(&self, state: ConnectionState) {
        self.shared.lock().await.state = state;
    }

    async fn mark_failed(&self, error: &ConnectionError) {
        {
            let mut shared = self.shared.lock().await;
            self.ready.store(false, Ordering::Release);
            shared.state = ConnectionState::Failed(error.to_string());
            shared.ready_since = None;
            shared.last_failure = Some(error.clone());
        }
        let hooks = self.hooks.read().await.clone();
        for hook in hooks {
            hook.on_error(error).await;
        }
    }

    /// Populate the cache for every configured group. Best effort per group.
    #[instrument(skip(self))]
    async fn warm_roster(&self) {
        let configs = match self.provider.list_group_configs().await {
            Ok(configs) => configs,
            Err(e) => {
                warn!(error = %e, "Could not list groups for warm roster fetch");
                return;
            }
        };

        for config in configs {
            match self.loader.load_group(&config.group_id).await {
                Ok(snapshot) => self.cache.insert_group(snapshot).await,
                Err(e) => warn!(
                    group_id = %config.group_id,
                    error = %e,
                    "Warm roster fetch failed for group"
                ),
            }
        }
    }

    // ── Event pump ────────────────────────────────────────────────────

    async fn run_pump(self: Arc<Self>, mut session: GatewaySession) {
        let mut epoch_rx = self.epoch.subscribe();
        let epoch = *epoch_rx.borrow();
        loop {
            tokio::select! {
                () = async {
                    let _ = epoch_rx.wait_for(|current| *current != epoch).await;
                } => {
                    session.close();
                    return;
                }
                event = session.events.recv() => {
                    let dropped = match event {
                        Some(GatewayEvent::Closed { code, resumable, sequence }) => {
                            self.note_drop(resumable, sequence).await;
                            info!(close_code = ?code, resumable, "Connection closed");
                            true
                        }
                        Some(GatewayEvent::InvalidSession { resumable }) => {
                            self.note_drop(resumable, None).await;
                            info!(resumable, "Session invalidated");
                            true
                        }
                        Some(event) => {
                            self.apply_event(event).await;
                            false
                        }
                        None => true,
                    };
                    if dropped {
                        session.close();
                        match self.reconnect(epoch).await {
                            Some(next) => session = next,
                            None => return,
                        }
                    }
                }
            }
        }
    }

    async fn note_drop(&self, resumable: bool, sequence: Option<u64>) {
        let mut shared = self.shared.lock().await;
        if !resumable {
            shared.session = None;
        } else if let (Some(token), Some(seq)) = (shared.session.as_mut(), sequence) {
            token.sequence = Some(seq);
        }
    }

    async fn reconnect(&self, epoch: u64) -> Option<GatewaySession> {
        if *self.epoch.borrow() != epoch {
            return None;
        }
        self.reconnects.fetch_add(1, Ordering::Relaxed);
        match self.establish(true).await {
            Ok((session, signal)) => {
                self.record_signal(signal).await;
                info!("Reconnected");
                Some(session)
            }
            Err(e) => {
                error!(error = %e, "Reconnect failed, lowering ready gate");
                self.mark_failed(&e).await;
                None
            }
        }
    }

    async fn apply_event(&self, event: GatewayEvent) {
        match event {
            GatewayEvent::GroupAvailable {
                group_id,
                roles,
                channels,
                members,
            } => {
                self.cache
                    .merge_group(&group_id, &roles, &channels, members)
                    .await;
            }
            GatewayEvent::GroupUnavailable { group_id } => self.cache.remove_group(&group_id).await,
            GatewayEvent::MemberUpsert { group_id, member } => {
                self.cache.upsert_member(&group_id, member).await;
            }
            GatewayEvent::MemberRemove { group_id, member_id } => {
                self.cache.remove_member(&group_id, &member_id).await;
            }
            GatewayEvent::RoleUpsert { group_id, role } => {
                self.cache.upsert_role(&group_id, &role).await;
            }
            GatewayEvent::RoleDelete { group_id, role_id } => {
                self.cache.remove_role(&group_id, &role_id).await;
            }
            GatewayEvent::ChannelUpsert { group_id, channel } => {
                self.cache.upsert_channel(&group_id, channel.id).await;
            }
            GatewayEvent::ChannelDelete { group_id, channel_id } => {
                self.cache.remove_channel(&group_id, &channel_id).await;
            }
            GatewayEvent::HeartbeatAck { latency } => {
                let millis = u64::try_from(latency.as_millis()).unwrap_or(NO_LATENCY - 1);
                self.latency_ms.store(millis, Ordering::Relaxed);
            }
            GatewayEvent::Ready { .. }
            | GatewayEvent::Resumed
            | GatewayEvent::InvalidSession { .. }
            | GatewayEvent::Closed { .. } => {}
        }
    }
}

impl ReadyGate for ConnectionManager {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("config", &self.config)
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}
