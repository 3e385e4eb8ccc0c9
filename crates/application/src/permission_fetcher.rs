use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use keyward_core::{Accountability, AppResult, PolicyId};
use keyward_domain::{DedupedAccess, FilterContext, Permission, PermissionAction, dedupe_access};
use serde_json::{Value, json};

use crate::{CachedResolver, PermissionQuery, PermissionStore, Resolve, ResultCache, events};

/// Deduplicated access entries keyed by collection.
pub type CollectionAccess = BTreeMap<String, Vec<DedupedAccess>>;

/// Loads the permissions granted by a set of policies.
///
/// Raw rows are cached per policy set, action and collections. Dynamic
/// variables are substituted per caller after the cache lookup, so cached
/// rows are shared by every caller holding the same policies.
pub struct PermissionFetcher {
    lookup: CachedResolver<RawPermissionLookup>,
}

impl PermissionFetcher {
    /// Creates a fetcher reading permissions from `store`.
    #[must_use]
    pub fn new(store: Arc<dyn PermissionStore>, cache: Arc<ResultCache>) -> Self {
        Self {
            lookup: CachedResolver::new(cache, RawPermissionLookup { store }),
        }
    }

    /// Returns the permissions for `action` granted by `policies`.
    ///
    /// `collections` restricts the result; `None` returns every collection.
    /// With an accountability, rules, validations and presets have their
    /// dynamic variables substituted.
    pub async fn fetch_permissions(
        &self,
        action: PermissionAction,
        policies: &[PolicyId],
        collections: Option<&[String]>,
        accountability: Option<&Accountability>,
    ) -> AppResult<Vec<Permission>> {
        if policies.is_empty() {
            return Ok(Vec::new());
        }

        let mut collections = collections.map(<[String]>::to_vec);
        if let Some(collections) = &mut collections {
            collections.sort();
            collections.dedup();
        }

        let query = PermissionQuery {
            policies: policies.to_vec(),
            action,
            collections,
        };
        let permissions = self.lookup.call(&query).await?;

        Ok(match accountability {
            Some(accountability) => {
                let context = FilterContext::new(accountability, policies);
                permissions
                    .iter()
                    .map(|permission| permission.resolve_variables(&context))
                    .collect()
            }
            None => permissions,
        })
    }

    /// Returns the permissions for `action` deduplicated per collection.
    pub async fn fetch_deduped(
        &self,
        action: PermissionAction,
        policies: &[PolicyId],
        collections: Option<&[String]>,
        accountability: Option<&Accountability>,
    ) -> AppResult<CollectionAccess> {
        let permissions = self
            .fetch_permissions(action, policies, collections, accountability)
            .await?;
        Ok(dedupe_by_collection(&permissions))
    }
}

/// Groups permissions per collection and deduplicates each group.
#[must_use]
pub fn dedupe_by_collection(permissions: &[Permission]) -> CollectionAccess {
    let mut grouped: BTreeMap<&str, Vec<Permission>> = BTreeMap::new();
    for permission in permissions {
        grouped
            .entry(permission.collection.as_str())
            .or_default()
            .push(permission.clone());
    }

    grouped
        .into_iter()
        .map(|(collection, permissions)| (collection.to_owned(), dedupe_access(&permissions)))
        .collect()
}

struct RawPermissionLookup {
    store: Arc<dyn PermissionStore>,
}

#[async_trait]
impl Resolve for RawPermissionLookup {
    type Input = PermissionQuery;
    type Output = Vec<Permission>;

    fn namespace(&self) -> &'static str {
        "permissions"
    }

    fn cache_key(&self, input: &PermissionQuery) -> Value {
        json!({
            "policies": input.policies,
            "action": input.action.as_str(),
            "collections": input.collections,
        })
    }

    async fn resolve(&self, input: &PermissionQuery) -> AppResult<Vec<Permission>> {
        self.store.list_permissions(input).await
    }

    fn invalidate_on(
        &self,
        _input: &PermissionQuery,
        _output: &Vec<Permission>,
    ) -> Vec<&'static str> {
        vec![
            events::PERMISSIONS_CREATE,
            events::PERMISSIONS_UPDATE,
            events::PERMISSIONS_DELETE,
            events::POLICIES_DELETE,
        ]
    }
}

#[cfg(test)]
mod tests;
