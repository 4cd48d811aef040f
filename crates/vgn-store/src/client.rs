//! Redis connection shared by the store implementations.

use redis::aio::MultiplexedConnection;
use tracing::debug;

use crate::error::StoreResult;

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Redis URL
    pub redis_url: String,
    /// Prefix for every key the store writes
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "nerfdb".to_string(),
        }
    }
}

impl StoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            key_prefix: std::env::var("STORE_KEY_PREFIX").unwrap_or_else(|_| "nerfdb".to_string()),
        }
    }
}

/// Handle to the Redis database holding queue and job documents.
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    config: StoreConfig,
}

impl RedisStore {
    /// Create a new store handle. Does not connect.
    pub fn new(config: StoreConfig) -> StoreResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> StoreResult<Self> {
        Self::new(StoreConfig::from_env())
    }

    pub(crate) async fn connection(&self) -> StoreResult<MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Build a namespaced key, e.g. `nerfdb:queues:sfm_list`.
    pub(crate) fn key(&self, collection: &str, id: &str) -> String {
        format!("{}:{}:{}", self.config.key_prefix, collection, id)
    }

    /// Round-trip a PING.
    pub async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        debug!("Store PING ok");
        Ok(())
    }
}
