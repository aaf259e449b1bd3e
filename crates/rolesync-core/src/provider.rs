//! Group configuration provider.
//!
//! The persistence store for per-group settings lives outside this service.
//! The engine only sees it through [`GroupConfigProvider`]. The in-memory
//! implementation backs the daemon (seeded from a JSON file) and the tests.

use crate::ids::GroupId;
use crate::model::GroupConfig;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Errors raised by a configuration provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The backing store could not be reached or read.
    #[error("Configuration store unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be decoded.
    #[error("Invalid group configuration: {0}")]
    Invalid(String),

    /// Two rows claim the same group.
    #[error("Duplicate configuration for group {0}")]
    Duplicate(GroupId),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Source of per-group settings, keyed uniquely by group id.
#[async_trait]
pub trait GroupConfigProvider: Send + Sync {
    /// All configured groups.
    async fn list_group_configs(&self) -> ProviderResult<Vec<GroupConfig>>;

    /// Insert or replace the config for `config.group_id`.
    async fn upsert_group_config(&self, config: GroupConfig) -> ProviderResult<GroupConfig>;

    /// The config for one group, if present.
    async fn get_group_config(&self, group_id: &GroupId) -> ProviderResult<Option<GroupConfig>>;
}

/// Provider backed by a map in process memory.
///
/// Listing returns configs ordered by group id.
#[derive(Debug, Clone, Default)]
pub struct InMemoryGroupConfigProvider {
    configs: Arc<RwLock<BTreeMap<GroupId, GroupConfig>>>,
}

impl InMemoryGroupConfigProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a provider from a list of configs, rejecting duplicates.
    pub fn from_configs(configs: Vec<GroupConfig>) -> ProviderResult<Self> {
        let mut map = BTreeMap::new();
        for config in configs {
            let group_id = config.group_id.clone();
            if map.insert(group_id.clone(), config).is_some() {
                return Err(ProviderError::Duplicate(group_id));
            }
        }
        Ok(Self {
            configs: Arc::new(RwLock::new(map)),
        })
    }

    /// Load a JSON array of [`GroupConfig`] rows from disk.
    pub async fn from_json_file(path: impl AsRef<Path>) -> ProviderResult<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await?;
        let configs: Vec<GroupConfig> = serde_json::from_str(&raw)
            .map_err(|e| ProviderError::Invalid(format!("{}: {e}", path.display())))?;

        info!(
            path = %path.display(),
            groups = configs.len(),
            "Loaded group configurations"
        );
        Self::from_configs(configs)
    }

    /// Number of configured groups.
    pub async fn len(&self) -> usize {
        self.configs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.configs.read().await.is_empty()
    }
}

#[async_trait]
impl GroupConfigProvider for InMemoryGroupConfigProvider {
    async fn list_group_configs(&self) -> ProviderResult<Vec<GroupConfig>> {
        Ok(self.configs.read().await.values().cloned().collect())
    }

    async fn upsert_group_config(&self, config: GroupConfig) -> ProviderResult<GroupConfig> {
        debug!(group_id = %config.group_id, "Upserting group configuration");
        self.configs
            .write()
            .await
            .insert(config.group_id.clone(), config.clone());
        Ok(config)
    }

    async fn get_group_config(&self, group_id: &GroupId) -> ProviderResult<Option<GroupConfig>> {
        Ok(self.configs.read().await.get(group_id).cloned())
    }
}
