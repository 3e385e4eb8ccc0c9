use std::sync::Arc;

use keyward_core::{Accountability, PolicyId, RoleId, UserId};
use keyward_domain::{Filter, Permission, PermissionAction};
use serde_json::json;

use crate::test_support::{fields, new_cache, schema, single_policy_store};
use crate::{PermissionFetcher, PolicyResolver};

use super::{FieldMap, InconsistentFieldMapBuilder};

fn builder(role: RoleId, permissions: Vec<Permission>) -> InconsistentFieldMapBuilder {
    let policy = permissions
        .first()
        .map_or_else(PolicyId::new, |permission| permission.policy);
    let store = Arc::new(single_policy_store(role, policy, permissions));
    let cache = new_cache();
    InconsistentFieldMapBuilder::new(
        Arc::new(PolicyResolver::new(store.clone(), cache.clone())),
        Arc::new(PermissionFetcher::new(store, cache.clone())),
        cache,
        Arc::new(schema(&[
            ("articles", &["id", "title", "body", "status"][..]),
            ("comments", &["id", "body"][..]),
        ])),
    )
}

#[tokio::test]
async fn fields_granted_by_only_some_rules_are_inconsistent() {
    let (role, policy) = (RoleId::new(), PolicyId::new());
    let builder = builder(
        role,
        vec![
            Permission::new(policy, "articles", PermissionAction::Read, fields(&["title", "body"]))
                .with_rule(Filter::new(json!({ "status": { "_eq": "draft" } }))),
            Permission::new(policy, "articles", PermissionAction::Read, fields(&["title"])),
        ],
    );

    let map = builder
        .build(
            Some(&Accountability::for_user(UserId::new(), vec![role])),
            PermissionAction::Read,
        )
        .await
        .unwrap_or_default();

    assert_eq!(map, FieldMap::from([("articles".to_owned(), fields(&["body"]))]));
}

#[tokio::test]
async fn wildcards_expand_to_schema_fields() {
    let (role, policy) = (RoleId::new(), PolicyId::new());
    let builder = builder(
        role,
        vec![
            Permission::new(policy, "articles", PermissionAction::Read, fields(&["*"]))
                .with_rule(Filter::new(json!({ "status": { "_eq": "published" } }))),
            Permission::new(policy, "articles", PermissionAction::Read, fields(&["id", "title"])),
            Permission::new(policy, "comments", PermissionAction::Read, fields(&["*"])),
        ],
    );

    let map = builder
        .build(
            Some(&Accountability::for_user(UserId::new(), vec![role])),
            PermissionAction::Read,
        )
        .await
        .unwrap_or_default();

    assert_eq!(map.get("articles"), Some(&fields(&["body", "status"])));
    assert_eq!(map.get("comments"), Some(&Vec::new()));
}

#[tokio::test]
async fn admin_and_missing_accountability_see_everything_uniformly() {
    let (role, policy) = (RoleId::new(), PolicyId::new());
    let builder = builder(
        role,
        vec![Permission::new(
            policy,
            "articles",
            PermissionAction::Read,
            fields(&["title"]),
        )],
    );
    let expected = FieldMap::from([
        ("articles".to_owned(), Vec::new()),
        ("comments".to_owned(), Vec::new()),
    ]);

    let admin = builder
        .build(Some(&Accountability::admin()), PermissionAction::Read)
        .await
        .unwrap_or_default();
    let anonymous = builder
        .build(None, PermissionAction::Read)
        .await
        .unwrap_or_default();

    assert_eq!(admin, expected);
    assert_eq!(anonymous, expected);
}
