use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::models::ChaosConfig;

/// Error types for config store operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// The requested config does not exist.
    #[error("config not found: {0}")]
    NotFound(String),

    /// The backend could not be reached. The proxy pipeline folds this into
    /// 404, absence and unreachability are indistinguishable to clients.
    #[error("storage transport error: {0}")]
    Transport(String),

    /// A stored document could not be encoded or decoded.
    #[error("failed to serialize config: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Rule-document storage. The request path only ever calls `get`; the rest
/// of the surface exists for the control plane.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<ChaosConfig, StoreError>;
    async fn save(&self, config: &ChaosConfig) -> Result<(), StoreError>;
    async fn list(&self) -> Result<Vec<ChaosConfig>, StoreError>;
    /// Saves an existing config, refreshing `updated_at`. Fails with
    /// `NotFound` when the id was never saved.
    async fn update(&self, config: &ChaosConfig) -> Result<(), StoreError>;
    async fn delete(&self, id: &str) -> Result<(), StoreError>;
}

/// In-memory config store. The default backend; also what the tests use.
#[derive(Default)]
pub struct MemoryStore {
    configs: RwLock<BTreeMap<String, ChaosConfig>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<ChaosConfig, StoreError> {
        let configs = self.configs.read().await;
        configs
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn save(&self, config: &ChaosConfig) -> Result<(), StoreError> {
        let mut configs = self.configs.write().await;
        configs.insert(config.id.clone(), config.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ChaosConfig>, StoreError> {
        let configs = self.configs.read().await;
        Ok(configs.values().cloned().collect())
    }

    async fn update(&self, config: &ChaosConfig) -> Result<(), StoreError> {
        let mut configs = self.configs.write().await;
        if !configs.contains_key(&config.id) {
            return Err(StoreError::NotFound(config.id.clone()));
        }
        let mut updated = config.clone();
        updated.updated_at = Utc::now();
        configs.insert(updated.id.clone(), updated);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let mut configs = self.configs.write().await;
        configs.remove(id);
        Ok(())
    }
}
