use std::sync::Arc;

use async_trait::async_trait;
use keyward_application::{
    AccessRowFilter, EventBus, EventPayload, PermissionQuery, PermissionStore, events,
};
use keyward_core::{AppResult, PolicyId};
use keyward_domain::{AccessRow, Permission};
use tokio::sync::RwLock;

use crate::PermissionFixture;

/// In-memory permission store, typically loaded from a fixture.
///
/// Writes emit the matching domain events on the attached bus so cached
/// resolutions are evicted.
#[derive(Default)]
pub struct InMemoryPermissionStore {
    access_rows: RwLock<Vec<AccessRow>>,
    permissions: RwLock<Vec<Permission>>,
    events: Option<Arc<EventBus>>,
}

impl InMemoryPermissionStore {
    /// Creates a store holding the given rows.
    #[must_use]
    pub fn new(access_rows: Vec<AccessRow>, permissions: Vec<Permission>) -> Self {
        Self {
            access_rows: RwLock::new(access_rows),
            permissions: RwLock::new(permissions),
            events: None,
        }
    }

    /// Creates a store holding the fixture's access rows and permissions.
    #[must_use]
    pub fn from_fixture(fixture: &PermissionFixture) -> Self {
        Self::new(fixture.access.clone(), fixture.permissions.clone())
    }

    /// Returns the store emitting write events on `bus`.
    #[must_use]
    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    /// Attaches a policy to a role, a user or the public.
    pub async fn add_access_row(&self, row: AccessRow) {
        let key = row.policy.id.to_string();
        self.access_rows.write().await.push(row);
        self.emit(events::ACCESS_CREATE, vec![key]).await;
    }

    /// Adds a permission rule.
    pub async fn add_permission(&self, permission: Permission) {
        let key = permission.policy.to_string();
        self.permissions.write().await.push(permission);
        self.emit(events::PERMISSIONS_CREATE, vec![key]).await;
    }

    /// Removes a policy with its attachments and permissions.
    ///
    /// Returns whether anything was removed.
    pub async fn delete_policy(&self, policy: PolicyId) -> bool {
        let removed_rows = {
            let mut access_rows = self.access_rows.write().await;
            let before = access_rows.len();
            access_rows.retain(|row| row.policy.id != policy);
            before - access_rows.len()
        };
        let removed_permissions = {
            let mut permissions = self.permissions.write().await;
            let before = permissions.len();
            permissions.retain(|permission| permission.policy != policy);
            before - permissions.len()
        };

        let removed = removed_rows + removed_permissions > 0;
        if removed {
            self.emit(events::POLICIES_DELETE, vec![policy.to_string()])
                .await;
        }
        removed
    }

    async fn emit(&self, event: &str, keys: Vec<String>) {
        if let Some(bus) = &self.events {
            bus.emit(event, &EventPayload { keys }).await;
        }
    }
}

#[async_trait]
impl PermissionStore for InMemoryPermissionStore {
    async fn list_access_rows(&self, filter: &AccessRowFilter) -> AppResult<Vec<AccessRow>> {
        Ok(self
            .access_rows
            .read()
            .await
            .iter()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect())
    }

    async fn list_permissions(&self, query: &PermissionQuery) -> AppResult<Vec<Permission>> {
        Ok(self
            .permissions
            .read()
            .await
            .iter()
            .filter(|permission| query.matches(permission))
            .cloned()
            .collect())
    }
}
