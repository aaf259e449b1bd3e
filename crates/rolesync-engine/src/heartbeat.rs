//! Liveness reporting to an external monitor.
//!
//! Each report is a `POST {base_url}/heartbeat` carrying the connection's
//! [`HealthSnapshot`]. Reports closer together than the debounce window are
//! dropped, and failures are logged and forgotten.

use async_trait::async_trait;
use reqwest::Client;
use rolesync_gateway::{ConnectionManager, HealthSnapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

/// Anything that can describe the process's current health.
#[async_trait]
pub trait HealthSource: Send + Sync {
    async fn health(&self) -> HealthSnapshot;
}

#[async_trait]
impl HealthSource for ConnectionManager {
    async fn health(&self) -> HealthSnapshot {
        ConnectionManager::health(self).await
    }
}

/// Heartbeat tuning.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Monitor base URL; `/heartbeat` is appended.
    pub base_url: Url,
    pub interval: Duration,
    /// Minimum spacing between two reports.
    pub debounce: Duration,
    pub request_timeout: Duration,
}

impl HeartbeatConfig {
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            interval: Duration::from_secs(30),
            debounce: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
        }
    }

    /// Raised to at least one second.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_secs(1));
        self
    }

    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/heartbeat", self.base_url.as_str().trim_end_matches('/'))
    }
}

/// Result of one [`HeartbeatReporter::report`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    Sent,
    /// Within the debounce window of the previous report.
    Debounced,
    Failed,
}

/// Debounced, fire-and-forget heartbeat poster.
pub struct HeartbeatReporter {
    http_client: Client,
    endpoint: String,
    config: HeartbeatConfig,
    source: Arc<dyn HealthSource>,
    last_sent: Mutex<Option<Instant>>,
}

impl std::fmt::Debug for HeartbeatReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeartbeatReporter")
            .field("endpoint", &self.endpoint)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl HeartbeatReporter {
    /// Build a reporter with its own HTTP client.
    pub fn new(config: HeartbeatConfig, source: Arc<dyn HealthSource>) -> reqwest::Result<Self> {
        let http_client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("rolesync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_http_client(config, source, http_client))
    }

    #[must_use]
    pub fn with_http_client(
        config: HeartbeatConfig,
        source: Arc<dyn HealthSource>,
        http_client: Client,
    ) -> Self {
        Self {
            endpoint: config.endpoint(),
            http_client,
            config,
            source,
            last_sent: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn config(&self) -> &HeartbeatConfig {
        &self.config
    }

    /// Post one heartbeat unless the previous one is too recent.
    pub async fn report(&self) -> HeartbeatOutcome {
        {
            let mut last_sent = self.last_sent.lock().await;
            let now = Instant::now();
            if let Some(previous) = *last_sent {
                if now.duration_since(previous) < self.config.debounce {
                    debug!("Heartbeat debounced");
                    return HeartbeatOutcome::Debounced;
                }
            }
            // Stamped before sending so overlapping triggers collapse.
            *last_sent = Some(now);
        }

        let snapshot = self.source.health().await;
        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&snapshot)
            .send()
            .await;

        match response {
            Ok(r) if r.status().is_success() => {
                debug!(ready = snapshot.ready, state = %snapshot.state, "Heartbeat sent");
                HeartbeatOutcome::Sent
            }
            Ok(r) => {
                warn!(status = %r.status(), "Heartbeat rejected");
                HeartbeatOutcome::Failed
            }
            Err(e) => {
                warn!(error = %e, "Heartbeat failed");
                HeartbeatOutcome::Failed
            }
        }
    }
}
