//! Redis-backed result cache store.

use async_trait::async_trait;
use keyward_application::CacheStore;
use keyward_core::{AppError, AppResult};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use tracing::debug;

const CLEAR_PREFIX_SCRIPT: &str = r#"
local cursor = '0'
local removed = 0
repeat
  local page = redis.call('SCAN', cursor, 'MATCH', ARGV[1], 'COUNT', 500)
  cursor = page[1]
  for _, key in ipairs(page[2]) do
    removed = removed + redis.call('DEL', key)
  end
until cursor == '0'
return removed
"#;

/// Redis implementation of the cache store port, shared between processes.
#[derive(Clone)]
pub struct RedisCacheStore {
    client: redis::Client,
    key_prefix: String,
    ttl_seconds: u32,
}

impl RedisCacheStore {
    /// Creates a store with a configured Redis client and key prefix.
    ///
    /// Entries expire after `ttl_seconds`; `0` keeps them until evicted.
    #[must_use]
    pub fn new(client: redis::Client, key_prefix: impl Into<String>, ttl_seconds: u32) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
            ttl_seconds,
        }
    }

    fn key_for(&self, key: &str) -> String {
        format!("{}:{key}", self.key_prefix)
    }

    async fn connection(&self) -> AppResult<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| AppError::Store(format!("failed to connect to redis: {error}")))
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut connection = self.connection().await?;
        connection
            .get(self.key_for(key))
            .await
            .map_err(|error| AppError::Store(format!("failed to read cache entry: {error}")))
    }

    async fn set(&self, key: &str, value: String) -> AppResult<()> {
        let key = self.key_for(key);
        let mut connection = self.connection().await?;

        let written: redis::RedisResult<()> = if self.ttl_seconds == 0 {
            connection.set(key, value).await
        } else {
            connection
                .set_ex(key, value, u64::from(self.ttl_seconds))
                .await
        };

        written.map_err(|error| AppError::Store(format!("failed to write cache entry: {error}")))
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        let mut connection = self.connection().await?;
        connection
            .del(self.key_for(key))
            .await
            .map_err(|error| AppError::Store(format!("failed to delete cache entry: {error}")))
    }

    async fn clear(&self) -> AppResult<()> {
        let mut connection = self.connection().await?;
        let script = Script::new(CLEAR_PREFIX_SCRIPT);
        let removed: i64 = script
            .arg(format!("{}:*", self.key_prefix))
            .invoke_async(&mut connection)
            .await
            .map_err(|error| AppError::Store(format!("failed to clear cache entries: {error}")))?;

        debug!(removed, prefix = %self.key_prefix, "cleared redis cache entries");
        Ok(())
    }
}
