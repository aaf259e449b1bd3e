//! Service wiring.
//!
//! [`SyncService`] ties the connection manager, the engine and the timers
//! together. The timers start from the manager's ready hook, so they start
//! once, after the cache is warm, no matter how many times `start()` runs.

use crate::audit::AuditEmitter;
use crate::engine::{EngineConfig, ReconciliationEngine};
use crate::error::{ReconcileError, ReconcileResult};
use crate::heartbeat::{HeartbeatConfig, HeartbeatReporter};
use crate::scheduler::Scheduler;
use async_trait::async_trait;
use rolesync_client::{BotToken, PlatformClient, PlatformResult, RosterClient, RosterConfig};
use rolesync_core::{GroupConfig, GroupConfigProvider};
use rolesync_gateway::ws::WsGateway;
use rolesync_gateway::{
    ConnectionError, ConnectionManager, HealthSnapshot, LifecycleConfig, LifecycleHook,
    ReadyGate, RestRosterLoader, RosterCache,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Everything needed to build the production service.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub api_base_url: String,
    pub token: BotToken,
    pub request_timeout: Duration,
    pub roster: RosterConfig,
    pub lifecycle: LifecycleConfig,
    pub engine: EngineConfig,
    /// Heartbeat reporting is off when `None`.
    pub heartbeat: Option<HeartbeatConfig>,
}

/// Starts the timers when the connection first becomes ready.
struct StartTimers {
    scheduler: Arc<Scheduler>,
}

#[async_trait]
impl LifecycleHook for StartTimers {
    async fn on_ready(&self) {
        if self.scheduler.start_once().await {
            info!("Recurring timers started");
        }
    }

    async fn on_error(&self, error: &ConnectionError) {
        error!(error = %error, "Connection gave up");
    }
}

pub struct SyncService {
    manager: Arc<ConnectionManager>,
    engine: Arc<ReconciliationEngine>,
    scheduler: Arc<Scheduler>,
    provider: Arc<dyn GroupConfigProvider>,
}

impl std::fmt::Debug for SyncService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncService")
            .field("manager", &self.manager)
            .field("engine", &self.engine)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl SyncService {
    /// Wire pre-built components and register the ready hook.
    pub async fn new(
        manager: Arc<ConnectionManager>,
        engine: Arc<ReconciliationEngine>,
        scheduler: Arc<Scheduler>,
        provider: Arc<dyn GroupConfigProvider>,
    ) -> Self {
        manager
            .add_hook(Arc::new(StartTimers {
                scheduler: Arc::clone(&scheduler),
            }))
            .await;
        Self {
            manager,
            engine,
            scheduler,
            provider,
        }
    }

    /// Build the production service over the REST API and websocket gateway.
    pub async fn from_settings(
        settings: ServiceSettings,
        provider: Arc<dyn GroupConfigProvider>,
    ) -> PlatformResult<Self> {
        let client = PlatformClient::new(
            &settings.api_base_url,
            settings.token,
            settings.request_timeout,
        )?;
        let roster = RosterClient::new(Arc::new(client.clone())).with_config(settings.roster);
        let loader = Arc::new(RestRosterLoader::new(client.clone(), roster.clone()));
        let cache = RosterCache::new();

        let manager = Arc::new(ConnectionManager::new(
            Arc::new(WsGateway::new(client.clone())),
            loader,
            Arc::clone(&provider),
            cache.clone(),
            settings.lifecycle,
        ));

        let engine = Arc::new(ReconciliationEngine::new(
            Arc::clone(&provider),
            manager.clone(),
            cache,
            Arc::new(roster),
            Arc::new(client.clone()),
            AuditEmitter::new(Arc::new(client)),
            settings.engine.clone(),
        ));

        let mut scheduler = Scheduler::new().with_task(
            "reconcile",
            settings.engine.reconcile_interval(),
            engine.clone(),
        );
        if let Some(config) = settings.heartbeat {
            let period = config.interval;
            let reporter = HeartbeatReporter::new(config, manager.clone())?;
            scheduler = scheduler.with_task("heartbeat", period, Arc::new(reporter));
        }

        Ok(Self::new(manager, engine, Arc::new(scheduler), provider).await)
    }

    #[must_use]
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<ReconciliationEngine> {
        &self.engine
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.manager.is_ready()
    }

    /// Bring the connection up. Timers start on the first success.
    pub async fn start(&self) -> Result<(), ConnectionError> {
        self.manager.start().await
    }

    /// Groups this process is currently managing.
    ///
    /// Fails with [`ReconcileError::NotReady`] while the connection is down
    /// instead of answering from a cold cache.
    pub async fn managed_groups(&self) -> ReconcileResult<Vec<GroupConfig>> {
        if !self.manager.is_ready() {
            return Err(ReconcileError::NotReady);
        }
        let cache = self.manager.cache();
        let mut managed = Vec::new();
        for config in self.provider.list_group_configs().await? {
            if cache.has_group(&config.group_id).await {
                managed.push(config);
            }
        }
        Ok(managed)
    }

    pub async fn health(&self) -> HealthSnapshot {
        self.manager.health().await
    }

    /// Stop the timers and close the connection.
    pub async fn shutdown(&self) {
        self.scheduler.stop().await;
        self.manager.shutdown().await;
        info!("Sync service stopped");
    }
}
