use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use keyward_core::{AppError, AppResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::{CacheStore, EventBus, EventHandler, EventPayload, SubscriptionId};

type Waiters = HashMap<String, Vec<oneshot::Sender<AppResult<Value>>>>;
type Registrations = Arc<Mutex<HashMap<String, Vec<SubscriptionId>>>>;

/// Misses between two sweeps of listeners whose entries expired in the store.
const SWEEP_EVERY_MISSES: u64 = 64;

/// Memoizes resolver results in a shared store.
///
/// At most one computation runs per key; concurrent callers for the same key
/// wait for it. Entries are evicted by event listeners registered through
/// [`CacheEntry::evict_on`]. Listeners of entries the store expired on its own
/// are detached on the next miss for that key and by a periodic sweep.
pub struct ResultCache {
    store: Arc<dyn CacheStore>,
    bus: Arc<EventBus>,
    in_flight: Mutex<Waiters>,
    registrations: Registrations,
    misses: AtomicU64,
}

impl ResultCache {
    /// Creates a cache over a store, evicting through `bus`.
    #[must_use]
    pub fn new(store: Arc<dyn CacheStore>, bus: Arc<EventBus>) -> Self {
        Self {
            store,
            bus,
            in_flight: Mutex::new(HashMap::new()),
            registrations: Arc::new(Mutex::new(HashMap::new())),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns the event bus used for eviction.
    #[must_use]
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Returns the cached value for `(namespace, key)` or computes and stores it.
    ///
    /// `on_compute` runs once per actual computation, after the value is
    /// stored. Errors are returned to every waiting caller and never cached.
    pub async fn get_or_compute<T, F, Fut, C>(
        &self,
        namespace: &str,
        key: &Value,
        compute: F,
        on_compute: C,
    ) -> AppResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
        C: FnOnce(&CacheEntry, &T),
    {
        let cache_key = cache_key(namespace, key);

        loop {
            if let Some(value) = self.read(&cache_key).await? {
                debug!(key = %cache_key, "result cache hit");
                return decode(&cache_key, value);
            }

            let receiver = {
                let mut in_flight = lock(&self.in_flight);
                match in_flight.get_mut(&cache_key) {
                    Some(waiters) => {
                        let (sender, receiver) = oneshot::channel();
                        waiters.push(sender);
                        Some(receiver)
                    }
                    None => {
                        in_flight.insert(cache_key.clone(), Vec::new());
                        None
                    }
                }
            };

            let Some(receiver) = receiver else {
                break;
            };

            match receiver.await {
                Ok(result) => return decode(&cache_key, result?),
                Err(_) => {
                    debug!(key = %cache_key, "result cache leader dropped, retrying");
                }
            }
        }

        let guard = InFlightGuard {
            in_flight: &self.in_flight,
            key: cache_key.as_str(),
            finished: false,
        };

        // A previous leader may have stored the value between our read and
        // our registration.
        match self.read(&cache_key).await {
            Ok(Some(value)) => {
                guard.finish(Ok(value.clone()));
                return decode(&cache_key, value);
            }
            Ok(None) => {}
            Err(error) => {
                guard.finish(Err(error.clone()));
                return Err(error);
            }
        }

        debug!(key = %cache_key, "result cache miss");
        // Listeners still registered here belong to an entry the store expired.
        detach(&cache_key, &Arc::downgrade(&self.bus), &self.registrations);
        let misses = self.misses.fetch_add(1, Ordering::Relaxed) + 1;
        if misses.is_multiple_of(SWEEP_EVERY_MISSES) {
            self.sweep().await;
        }

        let computed = compute().await.and_then(|output| {
            serde_json::to_value(&output)
                .map(|value| (output, value))
                .map_err(|error| {
                    AppError::Internal(format!(
                        "failed to encode cache entry '{cache_key}': {error}"
                    ))
                })
        });

        let (output, value) = match computed {
            Ok(computed) => computed,
            Err(error) => {
                guard.finish(Err(error.clone()));
                return Err(error);
            }
        };

        if let Err(error) = self.store.set(&cache_key, value.to_string()).await {
            guard.finish(Err(error.clone()));
            return Err(error);
        }

        let entry = CacheEntry {
            key: cache_key.clone(),
            store: self.store.clone(),
            bus: Arc::downgrade(&self.bus),
            registrations: self.registrations.clone(),
        };
        on_compute(&entry, &output);

        guard.finish(Ok(value));
        Ok(output)
    }

    /// Removes every entry and detaches every eviction listener.
    pub async fn clear(&self) -> AppResult<()> {
        let subscriptions: Vec<SubscriptionId> = lock(&self.registrations)
            .drain()
            .flat_map(|(_, subscriptions)| subscriptions)
            .collect();
        for subscription in subscriptions {
            self.bus.unsubscribe(subscription);
        }

        self.store.clear().await
    }

    /// Detaches the listeners of entries that are no longer in the store.
    ///
    /// Returns the number of entries whose listeners were detached.
    pub async fn prune_expired(&self) -> AppResult<usize> {
        let registered: Vec<(String, Vec<SubscriptionId>)> = lock(&self.registrations)
            .iter()
            .map(|(key, subscriptions)| (key.clone(), subscriptions.clone()))
            .collect();

        let mut pruned = 0;
        for (key, subscriptions) in registered {
            if self.store.get(&key).await?.is_some() {
                continue;
            }

            // A recomputation in the meantime registers new handles; keep those.
            let current = {
                let mut registrations = lock(&self.registrations);
                if registrations.get(&key) == Some(&subscriptions) {
                    registrations.remove(&key)
                } else {
                    None
                }
            };
            if let Some(subscriptions) = current {
                for subscription in subscriptions {
                    self.bus.unsubscribe(subscription);
                }
                pruned += 1;
            }
        }

        if pruned > 0 {
            debug!(pruned, "detached listeners of expired result cache entries");
        }
        Ok(pruned)
    }

    async fn sweep(&self) {
        if let Err(error) = self.prune_expired().await {
            warn!(%error, "failed to sweep expired result cache listeners");
        }
    }

    async fn read(&self, cache_key: &str) -> AppResult<Option<Value>> {
        self.store
            .get(cache_key)
            .await?
            .map(|raw| {
                serde_json::from_str::<Value>(raw.as_str()).map_err(|error| {
                    AppError::Internal(format!(
                        "failed to decode cache entry '{cache_key}': {error}"
                    ))
                })
            })
            .transpose()
    }
}

/// Handle to a freshly computed cache entry.
#[derive(Clone)]
pub struct CacheEntry {
    key: String,
    store: Arc<dyn CacheStore>,
    bus: Weak<EventBus>,
    registrations: Registrations,
}

impl CacheEntry {
    /// Returns the serialized cache key.
    #[must_use]
    pub fn key(&self) -> &str {
        self.key.as_str()
    }

    /// Evicts the entry the first time any of `events` is emitted.
    ///
    /// The listeners detach themselves on that first delivery. Listeners left
    /// over from an earlier computation of the same key are replaced.
    pub fn evict_on(&self, events: &[&str]) {
        let Some(bus) = self.bus.upgrade() else {
            return;
        };

        let previous = lock(&self.registrations).remove(&self.key);
        for subscription in previous.into_iter().flatten() {
            bus.unsubscribe(subscription);
        }

        let handler: Arc<dyn EventHandler> = Arc::new(EvictEntry {
            key: self.key.clone(),
            store: self.store.clone(),
            bus: self.bus.clone(),
            registrations: self.registrations.clone(),
        });
        let subscriptions: Vec<SubscriptionId> = events
            .iter()
            .map(|event| bus.subscribe(event, handler.clone()))
            .collect();

        lock(&self.registrations).insert(self.key.clone(), subscriptions);
    }

    /// Evicts the entry immediately.
    pub async fn dispose(&self) -> AppResult<()> {
        detach(&self.key, &self.bus, &self.registrations);
        self.store.delete(&self.key).await
    }
}

struct EvictEntry {
    key: String,
    store: Arc<dyn CacheStore>,
    bus: Weak<EventBus>,
    registrations: Registrations,
}

#[async_trait]
impl EventHandler for EvictEntry {
    async fn handle(&self, event: &str, _payload: &EventPayload) -> AppResult<()> {
        if !detach(&self.key, &self.bus, &self.registrations) {
            return Ok(());
        }

        debug!(key = %self.key, event, "evicting result cache entry");
        self.store.delete(&self.key).await
    }
}

/// Unsubscribes the listeners of `key`. Returns `false` if none were left.
fn detach(key: &str, bus: &Weak<EventBus>, registrations: &Registrations) -> bool {
    let Some(subscriptions) = lock(registrations).remove(key) else {
        return false;
    };

    if let Some(bus) = bus.upgrade() {
        for subscription in subscriptions {
            bus.unsubscribe(subscription);
        }
    }

    true
}

struct InFlightGuard<'a> {
    in_flight: &'a Mutex<Waiters>,
    key: &'a str,
    finished: bool,
}

impl InFlightGuard<'_> {
    fn finish(mut self, result: AppResult<Value>) {
        self.finished = true;
        let waiters = lock(self.in_flight).remove(self.key).unwrap_or_default();
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            // Dropping the senders wakes the waiters, which then retry.
            lock(self.in_flight).remove(self.key);
        }
    }
}

/// Resolver whose results are memoized by [`CachedResolver`].
#[async_trait]
pub trait Resolve: Send + Sync {
    /// Resolver input.
    type Input: Send + Sync;
    /// Resolver output.
    type Output: Serialize + DeserializeOwned + Send;

    /// Cache namespace shared by every key of this resolver.
    fn namespace(&self) -> &'static str;

    /// Derives the cache key from the input.
    fn cache_key(&self, input: &Self::Input) -> Value;

    /// Computes the output on a cache miss.
    async fn resolve(&self, input: &Self::Input) -> AppResult<Self::Output>;

    /// Events that evict a freshly computed entry.
    fn invalidate_on(&self, _input: &Self::Input, _output: &Self::Output) -> Vec<&'static str> {
        Vec::new()
    }
}

/// A resolver wrapped with a [`ResultCache`].
pub struct CachedResolver<R> {
    cache: Arc<ResultCache>,
    resolver: R,
}

impl<R: Resolve> CachedResolver<R> {
    /// Wraps `resolver` with `cache`.
    #[must_use]
    pub fn new(cache: Arc<ResultCache>, resolver: R) -> Self {
        Self { cache, resolver }
    }

    /// Returns the wrapped resolver.
    #[must_use]
    pub fn inner(&self) -> &R {
        &self.resolver
    }

    /// Returns the cached output for `input`, resolving it on a miss.
    pub async fn call(&self, input: &R::Input) -> AppResult<R::Output> {
        let key = self.resolver.cache_key(input);
        self.cache
            .get_or_compute(
                self.resolver.namespace(),
                &key,
                || self.resolver.resolve(input),
                |entry, output| {
                    let events = self.resolver.invalidate_on(input, output);
                    if !events.is_empty() {
                        entry.evict_on(&events);
                    }
                },
            )
            .await
    }
}

fn cache_key(namespace: &str, key: &Value) -> String {
    Value::Array(vec![Value::String(namespace.to_owned()), key.clone()]).to_string()
}

fn decode<T: DeserializeOwned>(cache_key: &str, value: Value) -> AppResult<T> {
    serde_json::from_value(value).map_err(|error| {
        AppError::Internal(format!(
            "failed to decode cache entry '{cache_key}': {error}"
        ))
    })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
