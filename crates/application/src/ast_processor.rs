use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use keyward_core::{Accountability, AppError, AppResult};
use keyward_domain::{
    ChildNode, CollectionNode, DedupedAccess, Filter, FilterReference, FunctionFieldNode,
    PermissionAction, QueryTree, SchemaOverview,
};
use tracing::debug;

use crate::{CollectionAccess, PermissionFetcher, PolicyContext, PolicyResolver};

mod requirements;

use requirements::collect_requirements;

/// Authorizes query trees and injects permission filters into them.
///
/// Selected fields at every level are checked against permissions for the
/// requested action. Fields read by filters, sorts and groupings are checked
/// against read permissions. The walk stops at the first denial.
pub struct AstPermissionProcessor {
    policies: Arc<PolicyResolver>,
    fetcher: Arc<PermissionFetcher>,
    schema: Arc<SchemaOverview>,
}

impl AstPermissionProcessor {
    /// Creates a processor over the shared resolvers.
    #[must_use]
    pub fn new(
        policies: Arc<PolicyResolver>,
        fetcher: Arc<PermissionFetcher>,
        schema: Arc<SchemaOverview>,
    ) -> Self {
        Self {
            policies,
            fetcher,
            schema,
        }
    }

    /// Authorizes `tree` for `action` and rewrites it in place.
    ///
    /// Admin trees are left untouched. On error the tree may be partially
    /// rewritten and must be discarded.
    pub async fn process(
        &self,
        tree: &mut QueryTree,
        action: PermissionAction,
        accountability: &Accountability,
    ) -> AppResult<()> {
        if accountability.is_admin() {
            return Ok(());
        }

        let policies = self
            .policies
            .resolve_policies(&PolicyContext::from_accountability(accountability))
            .await?;

        let mut index = AccessIndex::default();
        for (required_action, collections) in collect_requirements(tree, action, &self.schema) {
            let collections: Vec<String> = collections.into_iter().collect();
            let access = self
                .fetcher
                .fetch_deduped(
                    required_action,
                    &policies,
                    Some(collections.as_slice()),
                    Some(accountability),
                )
                .await?;
            index.by_action.insert(required_action, access);
        }

        let authorizer = NodeAuthorizer {
            action,
            index: &index,
            schema: &self.schema,
        };
        authorizer.authorize(tree).inspect_err(|error| {
            debug!(collection = %tree.collection, %error, "query tree denied");
        })
    }
}

#[derive(Default)]
struct AccessIndex {
    by_action: BTreeMap<PermissionAction, CollectionAccess>,
}

impl AccessIndex {
    fn entries(&self, action: PermissionAction, collection: &str) -> &[DedupedAccess] {
        self.by_action
            .get(&action)
            .and_then(|access| access.get(collection))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

struct NodeAuthorizer<'a> {
    action: PermissionAction,
    index: &'a AccessIndex,
    schema: &'a SchemaOverview,
}

impl NodeAuthorizer<'_> {
    fn authorize(&self, node: &mut CollectionNode) -> AppResult<()> {
        let entries = self.index.entries(self.action, &node.collection);
        let requested: BTreeSet<&str> = node
            .children
            .iter()
            .map(ChildNode::referenced_field)
            .collect();

        if let Some(field) = requested
            .iter()
            .find(|field| !entries.iter().any(|entry| entry.covers(field)))
        {
            return Err(AppError::FieldDenied {
                collection: node.collection.clone(),
                field: (*field).to_owned(),
            });
        }

        self.check_references(&node.collection, node.query.references())?;

        let applicable: Vec<&DedupedAccess> = entries
            .iter()
            .filter(|entry| {
                requested.is_empty() || requested.iter().any(|field| entry.covers(field))
            })
            .collect();
        if applicable.is_empty() {
            return Err(AppError::RowDenied {
                collection: node.collection.clone(),
            });
        }

        let cases: Vec<Filter> = applicable.iter().map(|entry| entry.rule.clone()).collect();
        if let Some(filter) = Filter::any_of(cases.iter().cloned()) {
            node.query.constrain(filter);
        }

        for child in &mut node.children {
            let when_case = applicable
                .iter()
                .enumerate()
                .filter(|(_, entry)| entry.covers(child.referenced_field()))
                .map(|(index, _)| index)
                .collect();
            child.set_when_case(when_case);

            match child {
                ChildNode::Field(_) => {}
                ChildNode::FunctionField(function) => self.authorize_function(function)?,
                ChildNode::Nested(nested) => {
                    for branch in &mut nested.branches {
                        self.authorize(branch)?;
                    }
                }
            }
        }

        node.cases = cases;
        Ok(())
    }

    fn authorize_function(&self, function: &mut FunctionFieldNode) -> AppResult<()> {
        let Some(related) = function.related_collection.clone() else {
            return Ok(());
        };

        let entries = self.index.entries(self.action, &related);
        if entries.is_empty() {
            return Err(AppError::RowDenied {
                collection: related,
            });
        }

        self.check_references(&related, function.query.references())?;

        function.cases = entries.iter().map(|entry| entry.rule.clone()).collect();
        if let Some(filter) = Filter::any_of(function.cases.iter().cloned()) {
            function.query.constrain(filter);
        }
        Ok(())
    }

    /// Requires read access to every field a filter, sort or grouping reads,
    /// following relations into the related collections.
    fn check_references(
        &self,
        collection: &str,
        references: Vec<FilterReference>,
    ) -> AppResult<()> {
        let entries = self.index.entries(PermissionAction::Read, collection);

        for reference in references {
            if !entries.iter().any(|entry| entry.covers(&reference.field)) {
                return Err(AppError::FieldDenied {
                    collection: collection.to_owned(),
                    field: reference.field,
                });
            }

            let Some(nested) = reference.nested else {
                continue;
            };
            let Some(relation) = self.schema.relation(collection, &reference.field) else {
                continue;
            };
            for related in &relation.collections {
                self.check_references(related, nested.references())?;
            }
        }

        Ok(())
    }
}
