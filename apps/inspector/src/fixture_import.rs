use std::future::Future;

use keyward_application::ResultCache;
use keyward_core::AppError;
use tracing::info;

/// Runs a bulk import, then drops every resolution cached before it.
///
/// The cache is left untouched when the import fails.
pub async fn import_then_clear<F>(import: F, cache: &ResultCache) -> Result<(), AppError>
where
    F: Future<Output = Result<(), AppError>>,
{
    import.await?;
    cache.clear().await?;
    info!("result cache cleared after import");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use keyward_application::{EventBus, ResultCache};
    use keyward_core::{AppError, AppResult};
    use keyward_infrastructure::InMemoryCacheStore;
    use serde_json::json;

    use super::import_then_clear;

    async fn cached_policies(cache: &ResultCache, computed: &AtomicUsize) -> AppResult<u32> {
        cache
            .get_or_compute(
                "policies",
                &json!({ "roles": [] }),
                || async {
                    computed.fetch_add(1, Ordering::SeqCst);
                    Ok(1_u32)
                },
                |entry, _| entry.evict_on(&["access.create"]),
            )
            .await
    }

    fn cache() -> (ResultCache, Arc<EventBus>) {
        let bus = Arc::new(EventBus::new());
        let cache = ResultCache::new(Arc::new(InMemoryCacheStore::new(0)), bus.clone());
        (cache, bus)
    }

    #[tokio::test]
    async fn successful_import_clears_cached_resolutions() {
        let (cache, bus) = cache();
        let computed = AtomicUsize::new(0);
        assert!(cached_policies(&cache, &computed).await.is_ok());

        let imported = import_then_clear(async { Ok(()) }, &cache).await;

        assert!(imported.is_ok());
        assert_eq!(bus.listener_count("access.create"), 0);
        assert!(cached_policies(&cache, &computed).await.is_ok());
        assert_eq!(computed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_import_keeps_the_cache() {
        let (cache, _) = cache();
        let computed = AtomicUsize::new(0);
        assert!(cached_policies(&cache, &computed).await.is_ok());

        let imported = import_then_clear(
            async { Err(AppError::Store("connection refused".to_owned())) },
            &cache,
        )
        .await;

        assert_eq!(
            imported,
            Err(AppError::Store("connection refused".to_owned()))
        );
        assert!(cached_policies(&cache, &computed).await.is_ok());
        assert_eq!(computed.load(Ordering::SeqCst), 1);
    }
}
