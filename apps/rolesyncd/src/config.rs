//! Daemon configuration loaded from environment variables.
//!
//! Loading fails fast: a missing token or an unparsable value stops the
//! process before anything connects.

use rolesync_client::{BotToken, RosterConfig, DEFAULT_API_BASE_URL};
use rolesync_engine::{EngineConfig, HeartbeatConfig, ServiceSettings};
use rolesync_gateway::LifecycleConfig;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub token: BotToken,
    pub api_base_url: String,
    /// JSON array of group rows loaded at boot.
    pub groups_file: Option<PathBuf>,
    pub heartbeat_url: Option<Url>,
    pub reconcile_interval: Duration,
    pub heartbeat_interval: Duration,
    pub page_size: u32,
    pub page_delay: Duration,
    pub login_max_attempts: u32,
    pub login_backoff: Duration,
    pub ready_timeout: Duration,
    pub request_timeout: Duration,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let token = get("ROLESYNC_TOKEN")
            .map(BotToken::new)
            .ok_or_else(|| ConfigError::MissingVar("ROLESYNC_TOKEN".to_string()))?;

        let api_base_url =
            get("ROLESYNC_API_BASE_URL").unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
        Url::parse(&api_base_url).map_err(|e| invalid("ROLESYNC_API_BASE_URL", e))?;

        let heartbeat_url = get("ROLESYNC_HEARTBEAT_URL")
            .map(|raw| Url::parse(&raw).map_err(|e| invalid("ROLESYNC_HEARTBEAT_URL", e)))
            .transpose()?;

        let page_size: u32 = parse_or(&get, "ROLESYNC_PAGE_SIZE", 1000)?;
        if page_size == 0 {
            return Err(invalid("ROLESYNC_PAGE_SIZE", "must be at least 1"));
        }

        let login_max_attempts: u32 = parse_or(&get, "ROLESYNC_LOGIN_MAX_ATTEMPTS", 3)?;
        if login_max_attempts == 0 {
            return Err(invalid("ROLESYNC_LOGIN_MAX_ATTEMPTS", "must be at least 1"));
        }

        Ok(Self {
            token,
            api_base_url,
            groups_file: get("ROLESYNC_GROUPS_FILE").map(PathBuf::from),
            heartbeat_url,
            reconcile_interval: secs(&get, "ROLESYNC_RECONCILE_INTERVAL_SECS", 5)?,
            heartbeat_interval: secs(&get, "ROLESYNC_HEARTBEAT_INTERVAL_SECS", 30)?,
            page_size,
            page_delay: Duration::from_millis(parse_or(&get, "ROLESYNC_PAGE_DELAY_MS", 100)?),
            login_max_attempts,
            login_backoff: Duration::from_secs(parse_or(&get, "ROLESYNC_LOGIN_BACKOFF_SECS", 2)?),
            ready_timeout: secs(&get, "ROLESYNC_READY_TIMEOUT_SECS", 30)?,
            request_timeout: secs(&get, "ROLESYNC_REQUEST_TIMEOUT_SECS", 15)?,
            rust_log: get("RUST_LOG").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Component settings for [`rolesync_engine::SyncService`].
    #[must_use]
    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            api_base_url: self.api_base_url.clone(),
            token: self.token.clone(),
            request_timeout: self.request_timeout,
            roster: RosterConfig::default()
                .with_page_size(self.page_size)
                .with_page_delay(self.page_delay),
            lifecycle: LifecycleConfig {
                max_login_attempts: self.login_max_attempts,
                login_backoff: self.login_backoff,
                ready_timeout: self.ready_timeout,
            },
            engine: EngineConfig::default().with_reconcile_interval(self.reconcile_interval),
            heartbeat: self.heartbeat_url.clone().map(|url| {
                HeartbeatConfig::new(url)
                    .with_interval(self.heartbeat_interval)
                    .with_request_timeout(self.request_timeout)
            }),
        }
    }
}

fn invalid(var: &str, message: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        var: var.to_string(),
        message: message.to_string(),
    }
}

fn parse_or<T, G>(get: &G, var: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(raw) => raw.trim().parse().map_err(|e| invalid(var, e)),
        None => Ok(default),
    }
}

/// A whole number of seconds, at least one.
fn secs<G>(get: &G, var: &str, default: u64) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let value: u64 = parse_or(get, var, default)?;
    if value == 0 {
        return Err(invalid(var, "must be at least 1"));
    }
    Ok(Duration::from_secs(value))
}
