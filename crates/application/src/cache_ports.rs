use async_trait::async_trait;
use keyward_core::AppResult;

/// Shared key-value store behind the result cache.
///
/// Values are serialized JSON documents.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the value stored under `key`.
    async fn get(&self, key: &str) -> AppResult<Option<String>>;

    /// Stores `value` under `key`.
    async fn set(&self, key: &str, value: String) -> AppResult<()>;

    /// Removes `key`.
    async fn delete(&self, key: &str) -> AppResult<()>;

    /// Removes every key owned by this store.
    async fn clear(&self) -> AppResult<()>;
}
