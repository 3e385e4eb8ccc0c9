use std::cmp::Ordering;
use std::collections::BTreeMap;

use async_trait::async_trait;
use keyward_application::{ExecutionEngine, Row};
use keyward_core::AppResult;
use keyward_domain::{ChildNode, CollectionNode, QueryTree};
use serde_json::Value;

use crate::PermissionFixture;

mod filter;

use filter::{compare_values, row_matches};

/// Execution engine over in-memory rows of each collection.
///
/// Only the root collection is queried. Relation and function children
/// return the stored value of their field. Fields whose cases match none of
/// a row's permission rules are returned as `null`.
#[derive(Default)]
pub struct InMemoryRowStore {
    rows: BTreeMap<String, Vec<Row>>,
}

impl InMemoryRowStore {
    /// Creates a store holding `rows` per collection.
    #[must_use]
    pub fn new(rows: BTreeMap<String, Vec<Row>>) -> Self {
        Self { rows }
    }

    /// Creates a store holding the fixture's rows.
    #[must_use]
    pub fn from_fixture(fixture: &PermissionFixture) -> Self {
        Self::new(fixture.rows.clone())
    }
}

#[async_trait]
impl ExecutionEngine for InMemoryRowStore {
    async fn execute(&self, tree: &QueryTree) -> AppResult<Vec<Row>> {
        let Some(stored) = self.rows.get(tree.collection.as_str()) else {
            return Ok(Vec::new());
        };

        let mut listed: Vec<&Row> = stored
            .iter()
            .filter(|row| {
                tree.query
                    .filter
                    .as_ref()
                    .is_none_or(|filter| row_matches(filter.as_value(), row))
            })
            .collect();

        if !tree.query.sort.is_empty() {
            listed.sort_by(|left, right| {
                for sort in &tree.query.sort {
                    let (field, descending) = match sort.strip_prefix('-') {
                        Some(field) => (field, true),
                        None => (sort.as_str(), false),
                    };
                    let ordering = compare_for_sort(left.get(field), right.get(field));
                    let ordering = if descending {
                        ordering.reverse()
                    } else {
                        ordering
                    };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
        }

        Ok(listed
            .into_iter()
            .skip(tree.query.offset.unwrap_or(0))
            .take(tree.query.limit.unwrap_or(usize::MAX))
            .map(|row| project(tree, row))
            .collect())
    }
}

fn compare_for_sort(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    match (left, right) {
        (Some(left), Some(right)) => compare_values(left, right).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Selects the node's children from a row, nulling fields no matching case grants.
fn project(node: &CollectionNode, row: &Row) -> Row {
    let matched: Vec<bool> = node
        .cases
        .iter()
        .map(|case| row_matches(case.as_value(), row))
        .collect();

    node.children
        .iter()
        .map(|child| {
            let visible = node.cases.is_empty()
                || child
                    .when_case()
                    .iter()
                    .any(|index| matched.get(*index).copied().unwrap_or(false));
            let value = if visible {
                row.get(child.referenced_field())
                    .cloned()
                    .unwrap_or(Value::Null)
            } else {
                Value::Null
            };
            (response_key(child).to_owned(), value)
        })
        .collect()
}

fn response_key(child: &ChildNode) -> &str {
    match child {
        ChildNode::Field(node) => node.field_key.as_str(),
        ChildNode::FunctionField(node) => node.field_key.as_str(),
        ChildNode::Nested(node) => node.field_key.as_str(),
    }
}

#[cfg(test)]
mod tests;
