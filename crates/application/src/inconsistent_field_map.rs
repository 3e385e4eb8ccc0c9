use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use keyward_core::{Accountability, AppResult, PolicyId};
use keyward_domain::{FieldMergeMode, PermissionAction, SchemaOverview, merge_fields};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    CachedResolver, PermissionFetcher, PolicyContext, PolicyResolver, Resolve, ResultCache,
    events,
};

/// Fields per collection whose visibility differs between rows.
pub type FieldMap = BTreeMap<String, Vec<String>>;

/// Computes which fields are only visible on some rows of a collection.
pub struct InconsistentFieldMapBuilder {
    policies: Arc<PolicyResolver>,
    lookup: CachedResolver<FieldMapLookup>,
    schema: Arc<SchemaOverview>,
}

impl InconsistentFieldMapBuilder {
    /// Creates a builder over the shared resolvers.
    #[must_use]
    pub fn new(
        policies: Arc<PolicyResolver>,
        fetcher: Arc<PermissionFetcher>,
        cache: Arc<ResultCache>,
        schema: Arc<SchemaOverview>,
    ) -> Self {
        Self {
            policies,
            lookup: CachedResolver::new(
                cache,
                FieldMapLookup {
                    fetcher,
                    schema: schema.clone(),
                },
            ),
            schema,
        }
    }

    /// Returns the row-dependent fields per collection.
    ///
    /// Without an accountability, or for admins, every collection maps to an
    /// empty list.
    pub async fn build(
        &self,
        accountability: Option<&Accountability>,
        action: PermissionAction,
    ) -> AppResult<FieldMap> {
        let Some(accountability) =
            accountability.filter(|accountability| !accountability.is_admin())
        else {
            return Ok(self
                .schema
                .collection_names()
                .into_iter()
                .map(|collection| (collection, Vec::new()))
                .collect());
        };

        let policies = self
            .policies
            .resolve_policies(&PolicyContext::from_accountability(accountability))
            .await?;

        self.lookup.call(&FieldMapInput { action, policies }).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct FieldMapInput {
    action: PermissionAction,
    policies: Vec<PolicyId>,
}

struct FieldMapLookup {
    fetcher: Arc<PermissionFetcher>,
    schema: Arc<SchemaOverview>,
}

#[async_trait]
impl Resolve for FieldMapLookup {
    type Input = FieldMapInput;
    type Output = FieldMap;

    fn namespace(&self) -> &'static str {
        "inconsistent-field-map"
    }

    fn cache_key(&self, input: &FieldMapInput) -> Value {
        json!({
            "action": input.action.as_str(),
            "policies": input.policies,
        })
    }

    async fn resolve(&self, input: &FieldMapInput) -> AppResult<FieldMap> {
        let access = self
            .fetcher
            .fetch_deduped(input.action, &input.policies, None, None)
            .await?;

        Ok(access
            .into_iter()
            .map(|(collection, entries)| {
                let grants: Vec<Vec<String>> = entries
                    .iter()
                    .map(|entry| expand_wildcard(&self.schema, &collection, entry.field_list()))
                    .collect();
                let somewhere = available_somewhere(&grants);
                (collection, somewhere)
            })
            .collect())
    }

    fn invalidate_on(&self, _input: &FieldMapInput, _output: &FieldMap) -> Vec<&'static str> {
        vec![
            events::PERMISSIONS_CREATE,
            events::PERMISSIONS_UPDATE,
            events::PERMISSIONS_DELETE,
            events::POLICIES_DELETE,
        ]
    }
}

/// Replaces `*` with the collection's fields when the schema knows them.
fn expand_wildcard(schema: &SchemaOverview, collection: &str, fields: Vec<String>) -> Vec<String> {
    let known = schema.fields_of(collection);
    if known.is_empty() || !fields.iter().any(|field| field == "*") {
        return fields;
    }

    known.to_vec()
}

/// Union of the grants minus their intersection.
fn available_somewhere(grants: &[Vec<String>]) -> Vec<String> {
    let Some((first, rest)) = grants.split_first() else {
        return Vec::new();
    };

    let (everywhere, anywhere) = rest.iter().fold(
        (first.clone(), first.clone()),
        |(everywhere, anywhere), grant| {
            (
                merge_fields(
                    Some(everywhere.as_slice()),
                    Some(grant.as_slice()),
                    FieldMergeMode::And,
                ),
                merge_fields(
                    Some(anywhere.as_slice()),
                    Some(grant.as_slice()),
                    FieldMergeMode::Or,
                ),
            )
        },
    );

    let everywhere: BTreeSet<String> = everywhere.into_iter().collect();
    if everywhere.contains("*") {
        return Vec::new();
    }

    anywhere
        .into_iter()
        .filter(|field| !everywhere.contains(field))
        .collect()
}

#[cfg(test)]
mod tests;
