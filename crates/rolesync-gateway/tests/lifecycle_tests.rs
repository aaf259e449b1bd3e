//! Connection lifecycle: retry budget, re-entrancy, timeouts, warm fetch
//! and background reconnects, driven by a scripted transport.

use async_trait::async_trait;
use rolesync_client::{PlatformError, PlatformResult};
use rolesync_core::{GroupConfig, GroupId, InMemoryGroupConfigProvider, MemberId, MemberRecord, RoleId};
use rolesync_gateway::{
    ConnectionError, ConnectionManager, ConnectionState, GatewayEvent, GatewaySession,
    GatewayTransport, GroupSnapshot, LifecycleConfig, LifecycleHook, ReadyGate, RosterCache,
    RosterLoader, SessionToken,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

// ═══════════════════════════════════════════════════════════════════════════
// Fakes
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy)]
enum Step {
    /// `connect` itself fails.
    LoginError,
    /// Authenticated, then the ready signal arrives.
    Ready,
    /// Authenticated, then a resumed signal arrives.
    Resumed,
    /// Authenticated but the ready signal never comes.
    Silent,
    /// Authenticated, then closed with the given code.
    CloseWith(u16),
}

#[derive(Default)]
struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    connects: AtomicU32,
    resumes: Mutex<Vec<Option<SessionToken>>>,
    /// Keeps event senders alive so sessions stay open; tests push events here.
    live: Mutex<Vec<mpsc::Sender<GatewayEvent>>>,
}

impl ScriptedTransport {
    fn new(steps: &[Step]) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.iter().copied().collect()),
            ..Default::default()
        })
    }

    fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    fn push_steps(&self, steps: &[Step]) {
        self.steps.lock().unwrap().extend(steps.iter().copied());
    }

    fn latest_sender(&self) -> mpsc::Sender<GatewayEvent> {
        self.live.lock().unwrap().last().cloned().unwrap()
    }
}

fn ready_event() -> GatewayEvent {
    GatewayEvent::Ready {
        session: SessionToken {
            session_id: "session-1".into(),
            resume_url: Some("wss://resume.example.test".into()),
            sequence: None,
        },
        user_id: MemberId::new("42"),
        groups: vec![GroupId::new("1")],
        shard: [0, 1],
    }
}

#[async_trait]
impl GatewayTransport for ScriptedTransport {
    async fn connect(&self, resume: Option<SessionToken>) -> Result<GatewaySession, ConnectionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.resumes.lock().unwrap().push(resume);
        let step = self.steps.lock().unwrap().pop_front().unwrap_or(Step::LoginError);

        let (tx, rx) = mpsc::channel(16);
        match step {
            Step::LoginError => return Err(ConnectionError::Transport("connection refused".into())),
            Step::Ready => tx.send(ready_event()).await.unwrap(),
            Step::Resumed => tx.send(GatewayEvent::Resumed).await.unwrap(),
            Step::Silent => {}
            Step::CloseWith(code) => tx
                .send(GatewayEvent::Closed {
                    code: Some(code),
                    resumable: false,
                    sequence: None,
                })
                .await
                .unwrap(),
        }
        self.live.lock().unwrap().push(tx);
        Ok(GatewaySession::new(rx))
    }
}

#[derive(Default)]
struct FakeLoader {
    failing: Vec<GroupId>,
    loads: AtomicU32,
}

#[async_trait]
impl RosterLoader for FakeLoader {
    async fn load_group(&self, group_id: &GroupId) -> PlatformResult<GroupSnapshot> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(group_id) {
            return Err(PlatformError::ApiError {
                status: 500,
                code: None,
                detail: "unavailable".into(),
            });
        }
        Ok(GroupSnapshot::new(group_id.clone())
            .with_role(RoleId::new("5"), "Tagged")
            .with_member(MemberRecord::new(MemberId::new("10"), "alice")))
    }
}

/// Drops the live session while the warm fetch is in progress, then stalls
/// long enough for the background reconnect to give up.
struct DroppingLoader {
    transport: Arc<ScriptedTransport>,
}

#[async_trait]
impl RosterLoader for DroppingLoader {
    async fn load_group(&self, group_id: &GroupId) -> PlatformResult<GroupSnapshot> {
        let _ = self
            .transport
            .latest_sender()
            .send(GatewayEvent::Closed {
                code: Some(4000),
                resumable: true,
                sequence: None,
            })
            .await;
        tokio::time::sleep(Duration::from_secs(20)).await;
        Ok(GroupSnapshot::new(group_id.clone()))
    }
}

#[derive(Default)]
struct CountingHook {
    ready: AtomicU32,
    errors: AtomicU32,
}

#[async_trait]
impl LifecycleHook for CountingHook {
    async fn on_ready(&self) {
        self.ready.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_error(&self, _error: &ConnectionError) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
}

fn manager_with(
    transport: Arc<ScriptedTransport>,
    loader: Arc<dyn RosterLoader>,
    groups: &[&str],
) -> Arc<ConnectionManager> {
    let provider = InMemoryGroupConfigProvider::from_configs(
        groups
            .iter()
            .map(|g| GroupConfig::new(GroupId::new(*g), RoleId::new("5")))
            .collect(),
    )
    .unwrap();
    Arc::new(ConnectionManager::new(
        transport,
        loader,
        Arc::new(provider),
        RosterCache::new(),
        LifecycleConfig {
            max_login_attempts: 3,
            login_backoff: Duration::from_secs(2),
            ready_timeout: Duration::from_secs(30),
        },
    ))
}

fn manager(transport: Arc<ScriptedTransport>) -> Arc<ConnectionManager> {
    manager_with(transport, Arc::new(FakeLoader::default()), &[])
}

// ═══════════════════════════════════════════════════════════════════════════
// Startup retry
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn test_start_succeeds_on_third_attempt() {
    let transport = ScriptedTransport::new(&[Step::LoginError, Step::LoginError, Step::Ready]);
    let manager = manager(transport.clone());

    let started = tokio::time::Instant::now();
    manager.start().await.unwrap();

    assert_eq!(transport.connects(), 3);
    assert!(manager.is_ready());
    assert_eq!(manager.state().await, ConnectionState::Ready);
    assert_eq!(started.elapsed(), Duration::from_secs(4), "two backoff pauses");
}

#[tokio::test(start_paused = true)]
async fn test_start_fails_after_exact_budget() {
    let transport = ScriptedTransport::new(&[]);
    let manager = manager(transport.clone());

    let err = manager.start().await.unwrap_err();

    assert_eq!(transport.connects(), 3);
    assert!(matches!(err, ConnectionError::LoginFailed { attempts: 3, .. }));
    assert!(!manager.is_ready());
    assert!(matches!(manager.state().await, ConnectionState::Failed(_)));
}

#[tokio::test(start_paused = true)]
async fn test_failed_start_is_not_permanent() {
    let transport = ScriptedTransport::new(&[]);
    let manager = manager(transport.clone());
    assert!(manager.start().await.is_err());

    transport.push_steps(&[Step::Ready]);
    manager.start().await.unwrap();

    assert_eq!(transport.connects(), 4);
    assert!(manager.is_ready());
}

#[tokio::test(start_paused = true)]
async fn test_auth_rejection_counts_against_budget() {
    let transport = ScriptedTransport::new(&[
        Step::CloseWith(4004),
        Step::CloseWith(4004),
        Step::CloseWith(4004),
    ]);
    let manager = manager(transport.clone());

    match manager.start().await.unwrap_err() {
        ConnectionError::LoginFailed { attempts, last_error } => {
            assert_eq!(attempts, 3);
            assert!(last_error.contains("4004"));
        }
        other => panic!("Expected LoginFailed, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_ready_timeout_is_distinct_failure() {
    let transport = ScriptedTransport::new(&[Step::Silent]);
    let manager = manager(transport.clone());

    let err = manager.start().await.unwrap_err();

    assert!(err.is_timeout());
    assert!(!err.is_auth_failure());
    assert_eq!(transport.connects(), 1);
    assert!(!manager.is_ready());
}

// ═══════════════════════════════════════════════════════════════════════════
// Re-entrancy
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn test_concurrent_starts_share_one_attempt() {
    let transport = ScriptedTransport::new(&[Step::LoginError, Step::Ready]);
    let manager = manager(transport.clone());

    let (a, b, c) = tokio::join!(manager.start(), manager.start(), manager.start());

    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    assert_eq!(transport.connects(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_starts_share_failure() {
    let transport = ScriptedTransport::new(&[]);
    let manager = manager(transport.clone());

    let (a, b) = tokio::join!(manager.start(), manager.start());

    assert_eq!(a.unwrap_err(), b.unwrap_err());
    assert_eq!(transport.connects(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_start_when_ready_is_immediate() {
    let transport = ScriptedTransport::new(&[Step::Ready]);
    let manager = manager(transport.clone());
    let hook = Arc::new(CountingHook::default());
    manager.add_hook(hook.clone()).await;

    manager.start().await.unwrap();
    manager.start().await.unwrap();

    assert_eq!(transport.connects(), 1);
    assert_eq!(hook.ready.load(Ordering::SeqCst), 1);
}

// ═══════════════════════════════════════════════════════════════════════════
// Warm fetch & events
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn test_warm_fetch_is_best_effort_per_group() {
    let transport = ScriptedTransport::new(&[Step::Ready]);
    let loader = Arc::new(FakeLoader {
        failing: vec![GroupId::new("1")],
        ..Default::default()
    });
    let manager = manager_with(transport, loader.clone(), &["1", "2"]);

    manager.start().await.unwrap();

    assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
    assert!(!manager.cache().has_group(&GroupId::new("1")).await);
    assert!(manager.cache().has_group(&GroupId::new("2")).await);
    assert_eq!(manager.health().await.members, 1);
}

#[tokio::test(start_paused = true)]
async fn test_events_update_cache() {
    let transport = ScriptedTransport::new(&[Step::Ready]);
    let manager = manager_with(transport.clone(), Arc::new(FakeLoader::default()), &["1"]);
    manager.start().await.unwrap();

    let events = transport.latest_sender();
    events
        .send(GatewayEvent::MemberUpsert {
            group_id: GroupId::new("1"),
            member: MemberRecord::new(MemberId::new("11"), "bob").with_role(RoleId::new("5")),
        })
        .await
        .unwrap();
    events
        .send(GatewayEvent::HeartbeatAck {
            latency: Duration::from_millis(42),
        })
        .await
        .unwrap();

    for _ in 0..50 {
        if manager.health().await.latency_ms.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let health = manager.health().await;
    assert_eq!(health.latency_ms, Some(42));
    assert_eq!(health.members, 2);
    assert!(health.ready);
}

// ═══════════════════════════════════════════════════════════════════════════
// Reconnects
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn test_resumable_drop_reconnects_without_lowering_gate() {
    let transport = ScriptedTransport::new(&[Step::Ready, Step::Resumed]);
    let manager = manager(transport.clone());
    manager.start().await.unwrap();

    transport
        .latest_sender()
        .send(GatewayEvent::Closed {
            code: Some(4000),
            resumable: true,
            sequence: Some(17),
        })
        .await
        .unwrap();

    for _ in 0..50 {
        if transport.connects() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(transport.connects(), 2);
    assert!(manager.is_ready());
    assert_eq!(manager.health().await.reconnects, 1);

    let resumes = transport.resumes.lock().unwrap().clone();
    let token = resumes[1].clone().expect("second connect resumes");
    assert_eq!(token.session_id, "session-1");
    assert_eq!(token.sequence, Some(17));
}

#[tokio::test(start_paused = true)]
async fn test_failed_reconnect_lowers_gate() {
    let transport = ScriptedTransport::new(&[Step::Ready]);
    let manager = manager(transport.clone());
    let hook = Arc::new(CountingHook::default());
    manager.add_hook(hook.clone()).await;
    manager.start().await.unwrap();

    transport
        .latest_sender()
        .send(GatewayEvent::Closed {
            code: Some(4000),
            resumable: true,
            sequence: None,
        })
        .await
        .unwrap();

    for _ in 0..100 {
        if !manager.is_ready() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    assert!(!manager.is_ready());
    assert_eq!(transport.connects(), 4, "initial plus a full reconnect budget");
    assert_eq!(hook.errors.load(Ordering::SeqCst), 1);
    assert!(matches!(manager.state().await, ConnectionState::Failed(_)));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_lowers_gate() {
    let transport = ScriptedTransport::new(&[Step::Ready]);
    let manager = manager(transport.clone());
    manager.start().await.unwrap();

    manager.shutdown().await;

    assert!(!manager.is_ready());
    assert_eq!(manager.state().await, ConnectionState::Disconnected);

    // The event pump notices the shutdown and drops its session.
    let events = transport.latest_sender();
    for _ in 0..50 {
        if events.is_closed() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(events.is_closed());
    assert_eq!(transport.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_drop_during_warm_fetch_does_not_raise_gate() {
    let transport = ScriptedTransport::new(&[Step::Ready]);
    let loader = Arc::new(DroppingLoader {
        transport: transport.clone(),
    });
    let manager = manager_with(transport.clone(), loader, &["1"]);
    let hook = Arc::new(CountingHook::default());
    manager.add_hook(hook.clone()).await;

    let err = manager.start().await.unwrap_err();

    assert!(matches!(err, ConnectionError::LoginFailed { attempts: 3, .. }));
    assert!(!manager.is_ready());
    assert!(matches!(manager.state().await, ConnectionState::Failed(_)));
    assert_eq!(transport.connects(), 4, "initial plus a full reconnect budget");
    assert_eq!(hook.ready.load(Ordering::SeqCst), 0);
    assert_eq!(hook.errors.load(Ordering::SeqCst), 1);
}
