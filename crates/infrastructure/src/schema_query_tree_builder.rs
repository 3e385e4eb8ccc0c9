use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use keyward_application::QueryTreeBuilder;
use keyward_core::{Accountability, AppError, AppResult};
use keyward_domain::{
    ChildNode, CollectionNode, FieldNode, FunctionFieldNode, NestedCollectionNode, Query,
    QueryTree, RelationKind, SchemaOverview,
};

/// Builds query trees from field paths using the schema's relations.
///
/// Supported paths: `field`, `*`, `fn(field)`, `relation.field` and, for
/// any-to-one relations, `relation:collection.field`.
pub struct SchemaQueryTreeBuilder {
    schema: Arc<SchemaOverview>,
}

impl SchemaQueryTreeBuilder {
    /// Creates a builder over a schema snapshot.
    #[must_use]
    pub fn new(schema: Arc<SchemaOverview>) -> Self {
        Self { schema }
    }

    fn children(&self, collection: &str, paths: &[String]) -> AppResult<Vec<ChildNode>> {
        if !self.schema.collections.contains_key(collection) {
            return Err(AppError::Schema(format!(
                "collection '{collection}' does not exist"
            )));
        }

        let mut children = Vec::new();
        let mut selected = HashSet::new();
        let mut relations: Vec<RelationPaths> = Vec::new();

        for path in paths {
            if path == "*" {
                for field in self.schema.fields_of(collection) {
                    if !self.is_alias(collection, field) && selected.insert(field.clone()) {
                        children.push(ChildNode::Field(FieldNode::new(field.as_str())));
                    }
                }
                continue;
            }

            if let Some((function, field)) = parse_function(path) {
                self.require_field(collection, field)?;
                let mut node = FunctionFieldNode::new(function, field);
                let related = self
                    .schema
                    .relation(collection, field)
                    .filter(|relation| relation.kind == RelationKind::OneToMany)
                    .and_then(|relation| relation.collections.into_iter().next());
                if let Some(related) = related {
                    node = node.over_relation(related);
                }
                if selected.insert(node.field_key.clone()) {
                    children.push(ChildNode::FunctionField(node));
                }
                continue;
            }

            if let Some((head, rest)) = path.split_once('.') {
                let (field, target) = match head.split_once(':') {
                    Some((field, target)) => (field, Some(target.to_owned())),
                    None => (head, None),
                };
                match relations.iter_mut().find(|relation| relation.field == field) {
                    Some(relation) => relation.paths.push((target, rest.to_owned())),
                    None => relations.push(RelationPaths {
                        field: field.to_owned(),
                        paths: vec![(target, rest.to_owned())],
                    }),
                }
                continue;
            }

            self.require_field(collection, path)?;
            if selected.insert(path.clone()) {
                children.push(ChildNode::Field(FieldNode::new(path.as_str())));
            }
        }

        for relation in relations {
            children.push(ChildNode::Nested(self.nested(collection, relation)?));
        }

        Ok(children)
    }

    fn nested(&self, collection: &str, relation: RelationPaths) -> AppResult<NestedCollectionNode> {
        let resolved = self
            .schema
            .relation(collection, &relation.field)
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "field '{}' of collection '{collection}' is not a relation",
                    relation.field
                ))
            })?;

        match resolved.kind {
            RelationKind::AnyToOne => {
                let mut branches = Vec::new();
                for target in &resolved.collections {
                    let paths: Vec<String> = relation
                        .paths
                        .iter()
                        .filter(|(scope, _)| scope.as_ref().is_none_or(|scope| scope == target))
                        .map(|(_, path)| path.clone())
                        .collect();
                    if !paths.is_empty() {
                        branches.push(CollectionNode::new(
                            target.as_str(),
                            self.children(target, &paths)?,
                        ));
                    }
                }
                Ok(NestedCollectionNode::any_to_one(relation.field, branches))
            }
            kind => {
                let target = resolved.collections.first().ok_or_else(|| {
                    AppError::Schema(format!(
                        "relation '{collection}.{}' has no related collection",
                        relation.field
                    ))
                })?;
                let paths: Vec<String> = relation.paths.into_iter().map(|(_, path)| path).collect();
                let branch = CollectionNode::new(target.as_str(), self.children(target, &paths)?);
                Ok(if kind == RelationKind::OneToMany {
                    NestedCollectionNode::one_to_many(relation.field, branch)
                } else {
                    NestedCollectionNode::many_to_one(relation.field, branch)
                })
            }
        }
    }

    fn require_field(&self, collection: &str, field: &str) -> AppResult<()> {
        if self
            .schema
            .fields_of(collection)
            .iter()
            .any(|candidate| candidate == field)
        {
            return Ok(());
        }

        Err(AppError::Validation(format!(
            "field '{field}' does not exist in collection '{collection}'"
        )))
    }

    fn is_alias(&self, collection: &str, field: &str) -> bool {
        self.schema
            .relation(collection, field)
            .is_some_and(|relation| relation.kind == RelationKind::OneToMany)
    }
}

#[async_trait]
impl QueryTreeBuilder for SchemaQueryTreeBuilder {
    async fn build_tree(
        &self,
        collection: &str,
        query: &Query,
        _accountability: &Accountability,
    ) -> AppResult<QueryTree> {
        let children = self.children(collection, &query.fields)?;
        Ok(CollectionNode::new(collection, children).with_query(query.to_tree_query()))
    }
}

struct RelationPaths {
    field: String,
    paths: Vec<(Option<String>, String)>,
}

/// Splits `count(comments)` into `("count", "comments")`.
fn parse_function(path: &str) -> Option<(&str, &str)> {
    let inner = path.strip_suffix(')')?;
    let (function, field) = inner.split_once('(')?;
    let valid = !function.is_empty()
        && function
            .chars()
            .all(|character| character.is_ascii_alphanumeric() || character == '_');
    valid.then_some((function, field))
}
