use std::collections::BTreeSet;
use std::sync::Arc;

use keyward_core::{Accountability, AppError, AppResult, PolicyId};
use keyward_domain::{
    FieldMergeMode, GlobalAccess, PermissionAction, QueryTree, SchemaOverview, merge_fields,
};
use serde_json::Value;
use tracing::debug;

use crate::{
    AstPermissionProcessor, ExecutionEngine, FieldMap, InconsistentFieldMapBuilder,
    ItemAccessValidator, PermissionFetcher, PermissionStore, PolicyContext, PolicyResolver,
    QueryTreeBuilder, ResultCache,
};

/// Entry point of the access engine for transport and write-path services.
#[derive(Clone)]
pub struct AccessService {
    policies: Arc<PolicyResolver>,
    fetcher: Arc<PermissionFetcher>,
    processor: Arc<AstPermissionProcessor>,
    validator: Arc<ItemAccessValidator>,
    field_maps: Arc<InconsistentFieldMapBuilder>,
    cache: Arc<ResultCache>,
    schema: Arc<SchemaOverview>,
}

impl AccessService {
    /// Wires the resolvers over the external ports.
    #[must_use]
    pub fn new(
        store: Arc<dyn PermissionStore>,
        tree_builder: Arc<dyn QueryTreeBuilder>,
        engine: Arc<dyn ExecutionEngine>,
        cache: Arc<ResultCache>,
        schema: Arc<SchemaOverview>,
    ) -> Self {
        let policies = Arc::new(PolicyResolver::new(store.clone(), cache.clone()));
        let fetcher = Arc::new(PermissionFetcher::new(store, cache.clone()));
        let processor = Arc::new(AstPermissionProcessor::new(
            policies.clone(),
            fetcher.clone(),
            schema.clone(),
        ));
        let validator = Arc::new(ItemAccessValidator::new(
            processor.clone(),
            tree_builder,
            engine,
            schema.clone(),
        ));
        let field_maps = Arc::new(InconsistentFieldMapBuilder::new(
            policies.clone(),
            fetcher.clone(),
            cache.clone(),
            schema.clone(),
        ));

        Self {
            policies,
            fetcher,
            processor,
            validator,
            field_maps,
            cache,
            schema,
        }
    }

    /// Returns the shared result cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// Returns the policies applicable to a caller, lowest precedence first.
    pub async fn resolve_policies(
        &self,
        accountability: &Accountability,
    ) -> AppResult<Vec<PolicyId>> {
        self.policies
            .resolve_policies(&PolicyContext::from_accountability(accountability))
            .await
    }

    /// Returns the admin and app flags granted to a caller.
    pub async fn resolve_global_access(
        &self,
        accountability: &Accountability,
    ) -> AppResult<GlobalAccess> {
        self.policies
            .resolve_global_access(&PolicyContext::from_accountability(accountability))
            .await
    }

    /// Authorizes a query tree and injects permission filters into it.
    pub async fn authorize_and_rewrite(
        &self,
        tree: &mut QueryTree,
        action: PermissionAction,
        accountability: &Accountability,
    ) -> AppResult<()> {
        self.processor.process(tree, action, accountability).await
    }

    /// Returns whether every listed item is accessible.
    pub async fn validate_item_access(
        &self,
        accountability: &Accountability,
        action: PermissionAction,
        collection: &str,
        keys: &[Value],
    ) -> AppResult<bool> {
        self.validator
            .validate_item_access(accountability, action, collection, keys)
            .await
    }

    /// Returns the fields whose visibility differs between rows.
    pub async fn inconsistent_field_map(
        &self,
        accountability: Option<&Accountability>,
        action: PermissionAction,
    ) -> AppResult<FieldMap> {
        self.field_maps.build(accountability, action).await
    }

    /// Returns every field granted on `collection` by any rule.
    pub async fn allowed_fields(
        &self,
        accountability: &Accountability,
        action: PermissionAction,
        collection: &str,
    ) -> AppResult<Vec<String>> {
        if accountability.is_admin() {
            return Ok(vec!["*".to_owned()]);
        }

        let policies = self.resolve_policies(accountability).await?;
        let collections = [collection.to_owned()];
        let permissions = self
            .fetcher
            .fetch_permissions(action, &policies, Some(collections.as_slice()), None)
            .await?;

        Ok(permissions.iter().fold(Vec::new(), |granted, permission| {
            merge_fields(
                Some(granted.as_slice()),
                Some(permission.fields.as_slice()),
                FieldMergeMode::Or,
            )
        }))
    }

    /// Returns the collections a caller holds any permission for.
    pub async fn allowed_collections(
        &self,
        accountability: &Accountability,
        action: PermissionAction,
    ) -> AppResult<Vec<String>> {
        if accountability.is_admin() {
            return Ok(self.schema.collection_names());
        }

        let policies = self.resolve_policies(accountability).await?;
        let permissions = self
            .fetcher
            .fetch_permissions(action, &policies, None, None)
            .await?;

        Ok(permissions
            .into_iter()
            .map(|permission| permission.collection)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect())
    }

    /// Gates an action on a collection, or on specific items of it.
    ///
    /// Without keys the caller needs at least one permission on the
    /// collection. With keys every item must pass item-level validation.
    pub async fn validate_access(
        &self,
        accountability: &Accountability,
        action: PermissionAction,
        collection: &str,
        keys: Option<&[Value]>,
    ) -> AppResult<()> {
        if accountability.is_admin() {
            return Ok(());
        }

        if let Some(keys) = keys.filter(|keys| !keys.is_empty()) {
            if self
                .validate_item_access(accountability, action, collection, keys)
                .await?
            {
                return Ok(());
            }

            debug!(collection, action = action.as_str(), "item access denied");
            return Err(AppError::Forbidden(format!(
                "{} access to items of collection '{collection}' is not allowed",
                action.as_str()
            )));
        }

        let policies = self.resolve_policies(accountability).await?;
        let collections = [collection.to_owned()];
        let permissions = self
            .fetcher
            .fetch_permissions(action, &policies, Some(collections.as_slice()), None)
            .await?;
        if permissions.is_empty() {
            debug!(collection, action = action.as_str(), "collection access denied");
            return Err(AppError::Forbidden(format!(
                "{} access to collection '{collection}' is not allowed",
                action.as_str()
            )));
        }

        Ok(())
    }
}
