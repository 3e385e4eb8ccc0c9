use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use keyward_core::AppResult;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Domain event names emitted by the permission store write path.
pub mod events {
    /// Access row created.
    pub const ACCESS_CREATE: &str = "access.create";
    /// Access row updated.
    pub const ACCESS_UPDATE: &str = "access.update";
    /// Access row deleted.
    pub const ACCESS_DELETE: &str = "access.delete";
    /// Policy updated.
    pub const POLICIES_UPDATE: &str = "policies.update";
    /// Policy deleted.
    pub const POLICIES_DELETE: &str = "policies.delete";
    /// Permission created.
    pub const PERMISSIONS_CREATE: &str = "permissions.create";
    /// Permission updated.
    pub const PERMISSIONS_UPDATE: &str = "permissions.update";
    /// Permission deleted.
    pub const PERMISSIONS_DELETE: &str = "permissions.delete";
    /// Role updated.
    pub const ROLES_UPDATE: &str = "roles.update";
    /// Role deleted.
    pub const ROLES_DELETE: &str = "roles.delete";
    /// User updated.
    pub const USERS_UPDATE: &str = "users.update";
    /// User deleted.
    pub const USERS_DELETE: &str = "users.delete";
}

/// Payload of one emitted event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPayload {
    /// Keys of the mutated items.
    #[serde(default)]
    pub keys: Vec<String>,
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Listener invoked for emitted events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handles one event.
    async fn handle(&self, event: &str, payload: &EventPayload) -> AppResult<()>;
}

#[derive(Default)]
struct Listeners {
    by_event: HashMap<String, Vec<(SubscriptionId, Arc<dyn EventHandler>)>>,
    event_of: HashMap<SubscriptionId, String>,
}

/// In-process event bus with explicit subscription handles.
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    listeners: Mutex<Listeners>,
}

impl EventBus {
    /// Creates a bus without listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `event` and returns its handle.
    pub fn subscribe(&self, event: &str, handler: Arc<dyn EventHandler>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut listeners = self.lock();
        listeners
            .by_event
            .entry(event.to_owned())
            .or_default()
            .push((id, handler));
        listeners.event_of.insert(id, event.to_owned());
        id
    }

    /// Removes a subscription. Returns whether it was still registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.lock();
        let Some(event) = listeners.event_of.remove(&id) else {
            return false;
        };

        if let Some(handlers) = listeners.by_event.get_mut(event.as_str()) {
            handlers.retain(|(handler_id, _)| *handler_id != id);
            if handlers.is_empty() {
                listeners.by_event.remove(event.as_str());
            }
        }
        true
    }

    /// Returns the number of handlers registered for `event`.
    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        self.lock().by_event.get(event).map_or(0, Vec::len)
    }

    /// Delivers an event to every handler registered when emission started.
    ///
    /// Handler failures are logged and do not stop delivery. Returns the
    /// number of handlers invoked.
    pub async fn emit(&self, event: &str, payload: &EventPayload) -> usize {
        let handlers: Vec<Arc<dyn EventHandler>> = self
            .lock()
            .by_event
            .get(event)
            .map(|handlers| handlers.iter().map(|(_, handler)| handler.clone()).collect())
            .unwrap_or_default();

        for handler in &handlers {
            if let Err(error) = handler.handle(event, payload).await {
                warn!(event, %error, "event handler failed");
            }
        }

        handlers.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Listeners> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use keyward_core::{AppError, AppResult};

    use super::{EventBus, EventHandler, EventPayload};

    #[derive(Default)]
    struct CountingHandler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn handle(&self, _event: &str, _payload: &EventPayload) -> AppResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl EventHandler for FailingHandler {
        async fn handle(&self, _event: &str, _payload: &EventPayload) -> AppResult<()> {
            Err(AppError::Store("cache offline".to_owned()))
        }
    }

    #[tokio::test]
    async fn emit_reaches_subscribers_of_the_event_only() {
        let bus = EventBus::new();
        let handler = Arc::new(CountingHandler::default());
        bus.subscribe("policies.update", handler.clone());

        assert_eq!(bus.emit("policies.update", &EventPayload::default()).await, 1);
        assert_eq!(bus.emit("roles.delete", &EventPayload::default()).await, 0);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsubscribed_handlers_are_not_called() {
        let bus = EventBus::new();
        let handler = Arc::new(CountingHandler::default());
        let id = bus.subscribe("roles.delete", handler.clone());

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.listener_count("roles.delete"), 0);
        assert_eq!(bus.emit("roles.delete", &EventPayload::default()).await, 0);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failing_handler_does_not_block_others() {
        let bus = EventBus::new();
        let handler = Arc::new(CountingHandler::default());
        bus.subscribe("users.update", Arc::new(FailingHandler));
        bus.subscribe("users.update", handler.clone());

        assert_eq!(bus.emit("users.update", &EventPayload::default()).await, 2);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }
}
