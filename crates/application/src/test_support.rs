use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use keyward_core::{Accountability, AppResult, PolicyId, RoleId};
use keyward_domain::{
    AccessRow, CollectionNode, CollectionSchema, Permission, Policy, Query, QueryTree,
    SchemaOverview,
};
use tokio::sync::{Mutex, RwLock};

use crate::{
    AccessRowFilter, CacheStore, EventBus, ExecutionEngine, PermissionQuery, PermissionStore,
    QueryTreeBuilder, ResultCache, Row,
};

#[derive(Default)]
pub(crate) struct MemoryCacheStore {
    pub(crate) entries: RwLock<HashMap<String, String>>,
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> AppResult<()> {
        self.entries.write().await.insert(key.to_owned(), value);
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

pub(crate) fn new_cache() -> Arc<ResultCache> {
    Arc::new(ResultCache::new(
        Arc::new(MemoryCacheStore::default()),
        Arc::new(EventBus::new()),
    ))
}

#[derive(Default)]
pub(crate) struct FakePermissionStore {
    pub(crate) access_rows: Mutex<Vec<AccessRow>>,
    pub(crate) permissions: Mutex<Vec<Permission>>,
    pub(crate) access_row_reads: AtomicUsize,
    pub(crate) permission_reads: AtomicUsize,
}

impl FakePermissionStore {
    pub(crate) fn new(access_rows: Vec<AccessRow>, permissions: Vec<Permission>) -> Self {
        Self {
            access_rows: Mutex::new(access_rows),
            permissions: Mutex::new(permissions),
            ..Self::default()
        }
    }
}

#[async_trait]
impl PermissionStore for FakePermissionStore {
    async fn list_access_rows(&self, filter: &AccessRowFilter) -> AppResult<Vec<AccessRow>> {
        self.access_row_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .access_rows
            .lock()
            .await
            .iter()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect())
    }

    async fn list_permissions(&self, query: &PermissionQuery) -> AppResult<Vec<Permission>> {
        self.permission_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .permissions
            .lock()
            .await
            .iter()
            .filter(|permission| query.matches(permission))
            .cloned()
            .collect())
    }
}

pub(crate) fn fields(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| (*name).to_owned()).collect()
}

pub(crate) fn schema(collections: &[(&str, &[&str])]) -> SchemaOverview {
    SchemaOverview {
        collections: collections
            .iter()
            .map(|(name, collection_fields)| {
                (
                    (*name).to_owned(),
                    CollectionSchema {
                        primary_key: Some("id".to_owned()),
                        fields: fields(collection_fields),
                    },
                )
            })
            .collect(),
        relations: Vec::new(),
    }
}

/// Store with one role holding one policy.
pub(crate) fn single_policy_store(
    role: RoleId,
    policy: PolicyId,
    permissions: Vec<Permission>,
) -> FakePermissionStore {
    FakePermissionStore::new(
        vec![AccessRow {
            policy: Policy::new(policy),
            role: Some(role),
            user: None,
            sort: None,
        }],
        permissions,
    )
}

pub(crate) struct FlatTreeBuilder;

#[async_trait]
impl QueryTreeBuilder for FlatTreeBuilder {
    async fn build_tree(
        &self,
        collection: &str,
        query: &Query,
        _accountability: &Accountability,
    ) -> AppResult<QueryTree> {
        Ok(CollectionNode::new(collection, Vec::new()).with_query(query.to_tree_query()))
    }
}

pub(crate) struct FixedRowsEngine {
    rows: usize,
    pub(crate) executed: Mutex<Vec<QueryTree>>,
}

impl FixedRowsEngine {
    pub(crate) fn new(rows: usize) -> Self {
        Self {
            rows,
            executed: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ExecutionEngine for FixedRowsEngine {
    async fn execute(&self, tree: &QueryTree) -> AppResult<Vec<Row>> {
        self.executed.lock().await.push(tree.clone());
        Ok(vec![Row::new(); self.rows])
    }
}
