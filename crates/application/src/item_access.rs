use std::collections::BTreeSet;
use std::sync::Arc;

use keyward_core::{Accountability, AppResult};
use keyward_domain::{Filter, PermissionAction, Query, SchemaOverview};
use serde_json::{Map, Value};
use tracing::debug;

use crate::{AstPermissionProcessor, ExecutionEngine, QueryTreeBuilder};

/// Checks access to concrete items by running a permission-filtered query.
///
/// This is the only check that evaluates rules depending on row data, at the
/// cost of one round trip to storage per call. Dropping the returned future
/// cancels the query.
pub struct ItemAccessValidator {
    processor: Arc<AstPermissionProcessor>,
    tree_builder: Arc<dyn QueryTreeBuilder>,
    engine: Arc<dyn ExecutionEngine>,
    schema: Arc<SchemaOverview>,
}

impl ItemAccessValidator {
    /// Creates a validator over the processor and the external query ports.
    #[must_use]
    pub fn new(
        processor: Arc<AstPermissionProcessor>,
        tree_builder: Arc<dyn QueryTreeBuilder>,
        engine: Arc<dyn ExecutionEngine>,
        schema: Arc<SchemaOverview>,
    ) -> Self {
        Self {
            processor,
            tree_builder,
            engine,
            schema,
        }
    }

    /// Returns whether every item in `keys` is accessible for `action`.
    ///
    /// Duplicate keys count once. A collection without primary key is a
    /// schema error, never a denial.
    pub async fn validate_item_access(
        &self,
        accountability: &Accountability,
        action: PermissionAction,
        collection: &str,
        keys: &[Value],
    ) -> AppResult<bool> {
        let primary_key = self.schema.primary_key(collection)?.to_owned();

        let mut seen = BTreeSet::new();
        let keys: Vec<Value> = keys
            .iter()
            .filter(|key| seen.insert(key.to_string()))
            .cloned()
            .collect();
        if keys.is_empty() {
            return Ok(true);
        }

        let query = Query {
            limit: Some(keys.len()),
            ..Query::default()
        };
        let mut tree = self
            .tree_builder
            .build_tree(collection, &query, accountability)
            .await?;
        self.processor
            .process(&mut tree, action, accountability)
            .await?;

        let expected = keys.len();
        tree.query.constrain(key_filter(primary_key, keys));

        let rows = self.engine.execute(&tree).await?;
        debug!(
            collection,
            action = action.as_str(),
            expected,
            returned = rows.len(),
            "validated item access"
        );

        Ok(rows.len() == expected)
    }
}

/// Builds `{ <primary_key>: { "_in": keys } }`.
fn key_filter(primary_key: String, keys: Vec<Value>) -> Filter {
    let mut operator = Map::new();
    operator.insert("_in".to_owned(), Value::Array(keys));

    let mut filter = Map::new();
    filter.insert(primary_key, Value::Object(operator));
    Filter::new(Value::Object(filter))
}
