use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use keyward_application::CacheStore;
use keyward_core::AppResult;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|expires_at| expires_at > now)
    }
}

/// Process-local cache store.
#[derive(Default)]
pub struct InMemoryCacheStore {
    entries: RwLock<HashMap<String, StoredValue>>,
    ttl_seconds: u32,
}

impl InMemoryCacheStore {
    /// Creates a store whose entries expire after `ttl_seconds` (`0` never expires).
    #[must_use]
    pub fn new(ttl_seconds: u32) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl_seconds,
        }
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.is_live(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }

        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
            entries.remove(key);
        }

        Ok(None)
    }

    async fn set(&self, key: &str, value: String) -> AppResult<()> {
        let now = Instant::now();
        let expires_at = (self.ttl_seconds > 0).then(|| {
            now.checked_add(Duration::from_secs(u64::from(self.ttl_seconds)))
                .unwrap_or(now)
        });

        self.entries
            .write()
            .await
            .insert(key.to_owned(), StoredValue { value, expires_at });

        Ok(())
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn clear(&self) -> AppResult<()> {
        self.entries.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use keyward_application::CacheStore;

    use super::InMemoryCacheStore;

    #[tokio::test]
    async fn stores_and_deletes_values() {
        let store = InMemoryCacheStore::new(0);

        assert!(store.set("a", "1".to_owned()).await.is_ok());
        assert!(store.set("b", "2".to_owned()).await.is_ok());
        assert_eq!(store.get("a").await, Ok(Some("1".to_owned())));

        assert!(store.delete("a").await.is_ok());
        assert_eq!(store.get("a").await, Ok(None));

        assert!(store.clear().await.is_ok());
        assert_eq!(store.get("b").await, Ok(None));
    }

    #[tokio::test]
    async fn expired_entries_read_as_missing() {
        let store = InMemoryCacheStore::new(1);
        assert!(store.set("a", "1".to_owned()).await.is_ok());
        assert_eq!(store.get("a").await, Ok(Some("1".to_owned())));

        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert_eq!(store.get("a").await, Ok(None));
        assert!(store.entries.read().await.is_empty());
    }
}
