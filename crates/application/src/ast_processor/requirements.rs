use std::collections::{BTreeMap, BTreeSet};

use keyward_domain::{ChildNode, CollectionNode, FilterReference, PermissionAction, SchemaOverview};

/// Collections per action whose permissions authorizing `tree` needs.
pub(super) fn collect_requirements(
    tree: &CollectionNode,
    action: PermissionAction,
    schema: &SchemaOverview,
) -> BTreeMap<PermissionAction, BTreeSet<String>> {
    let mut requirements = BTreeMap::new();
    let mut pending = vec![tree];

    while let Some(node) = pending.pop() {
        require(&mut requirements, action, &node.collection);
        collect_references(
            &mut requirements,
            schema,
            &node.collection,
            node.query.references(),
        );

        for child in &node.children {
            match child {
                ChildNode::Field(_) => {}
                ChildNode::FunctionField(function) => {
                    if let Some(related) = &function.related_collection {
                        require(&mut requirements, action, related);
                        collect_references(
                            &mut requirements,
                            schema,
                            related,
                            function.query.references(),
                        );
                    }
                }
                ChildNode::Nested(nested) => pending.extend(nested.branches.iter()),
            }
        }
    }

    requirements
}

fn collect_references(
    requirements: &mut BTreeMap<PermissionAction, BTreeSet<String>>,
    schema: &SchemaOverview,
    collection: &str,
    references: Vec<FilterReference>,
) {
    if references.is_empty() {
        return;
    }
    require(requirements, PermissionAction::Read, collection);

    for reference in references {
        let Some(nested) = reference.nested else {
            continue;
        };
        let Some(relation) = schema.relation(collection, &reference.field) else {
            continue;
        };
        for related in &relation.collections {
            collect_references(requirements, schema, related, nested.references());
        }
    }
}

fn require(
    requirements: &mut BTreeMap<PermissionAction, BTreeSet<String>>,
    action: PermissionAction,
    collection: &str,
) {
    requirements
        .entry(action)
        .or_default()
        .insert(collection.to_owned());
}
