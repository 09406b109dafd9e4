//! Redis-backed persistence, compiled in with the `redis` feature. Configs
//! live under `chaos:config:<id>` with a membership set for listing;
//! request logs go to a capped global list.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

use crate::models::{ChaosConfig, RequestLog};
use crate::observer::LogSink;
use crate::store::{ConfigStore, StoreError};

const CONFIG_PREFIX: &str = "chaos:config:";
const CONFIG_SET: &str = "chaos:configs";
const LOGS_KEY: &str = "chaos:logs:global";
const MAX_LOGS: isize = 100;

fn transport(e: redis::RedisError) -> StoreError {
    StoreError::Transport(e.to_string())
}

pub struct RedisStore {
    conn: MultiplexedConnection,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(transport)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(transport)?;
        Ok(Self { conn })
    }

    /// A handle for sinks sharing this store's connection.
    pub fn connection(&self) -> MultiplexedConnection {
        self.conn.clone()
    }

    fn key(id: &str) -> String {
        format!("{}{}", CONFIG_PREFIX, id)
    }
}

#[async_trait]
impl ConfigStore for RedisStore {
    async fn get(&self, id: &str) -> Result<ChaosConfig, StoreError> {
        let mut conn = self.conn.clone();
        let data: Option<String> = conn.get(Self::key(id)).await.map_err(transport)?;
        let data = data.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        Ok(serde_json::from_str(&data)?)
    }

    async fn save(&self, config: &ChaosConfig) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let data = serde_json::to_string(config)?;
        let _: () = conn
            .set(Self::key(&config.id), data)
            .await
            .map_err(transport)?;
        let _: () = conn.sadd(CONFIG_SET, &config.id).await.map_err(transport)?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ChaosConfig>, StoreError> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.smembers(CONFIG_SET).await.map_err(transport)?;
        let mut configs = Vec::with_capacity(ids.len());
        for id in ids {
            // Skip entries that vanished or fail to decode.
            if let Ok(config) = self.get(&id).await {
                configs.push(config);
            }
        }
        Ok(configs)
    }

    async fn update(&self, config: &ChaosConfig) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let exists: bool = conn
            .exists(Self::key(&config.id))
            .await
            .map_err(transport)?;
        if !exists {
            return Err(StoreError::NotFound(config.id.clone()));
        }
        let mut updated = config.clone();
        updated.updated_at = chrono::Utc::now();
        self.save(&updated).await
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(Self::key(id)).await.map_err(transport)?;
        let _: () = conn.srem(CONFIG_SET, id).await.map_err(transport)?;
        Ok(())
    }
}

pub struct RedisLogSink {
    conn: MultiplexedConnection,
}

impl RedisLogSink {
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl LogSink for RedisLogSink {
    async fn record(&self, entry: RequestLog) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let data = serde_json::to_string(&entry)?;
        let _: () = redis::pipe()
            .lpush(LOGS_KEY, data)
            .ltrim(LOGS_KEY, 0, MAX_LOGS - 1)
            .query_async(&mut conn)
            .await
            .map_err(transport)?;
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<RequestLog>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn
            .lrange(LOGS_KEY, 0, limit as isize - 1)
            .await
            .map_err(transport)?;
        Ok(raw
            .iter()
            .filter_map(|v| serde_json::from_str(v).ok())
            .collect())
    }
}
