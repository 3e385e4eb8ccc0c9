use std::sync::Arc;
use std::sync::atomic::Ordering;

use keyward_core::{Accountability, PolicyId, RoleId, UserId};
use keyward_domain::{Filter, Permission, PermissionAction};
use serde_json::json;

use crate::test_support::{FakePermissionStore, fields, new_cache};
use crate::{EventPayload, events};

use super::PermissionFetcher;

fn fetcher(permissions: Vec<Permission>) -> (PermissionFetcher, Arc<FakePermissionStore>) {
    let store = Arc::new(FakePermissionStore::new(Vec::new(), permissions));
    (PermissionFetcher::new(store.clone(), new_cache()), store)
}

#[tokio::test]
async fn fetches_only_requested_policies_action_and_collections() {
    let (granted, other) = (PolicyId::new(), PolicyId::new());
    let (fetcher, _) = fetcher(vec![
        Permission::new(granted, "articles", PermissionAction::Read, fields(&["title"])),
        Permission::new(granted, "comments", PermissionAction::Read, fields(&["body"])),
        Permission::new(granted, "articles", PermissionAction::Update, fields(&["title"])),
        Permission::new(other, "articles", PermissionAction::Read, fields(&["*"])),
    ]);

    let permissions = fetcher
        .fetch_permissions(
            PermissionAction::Read,
            &[granted],
            Some(["articles".to_owned()].as_slice()),
            None,
        )
        .await
        .unwrap_or_default();

    assert_eq!(permissions.len(), 1);
    assert_eq!(permissions[0].collection, "articles");
    assert_eq!(permissions[0].fields, fields(&["title"]));
}

#[tokio::test]
async fn no_policies_short_circuits_the_store() {
    let (fetcher, store) = fetcher(Vec::new());

    let permissions = fetcher
        .fetch_permissions(PermissionAction::Read, &[], None, None)
        .await;

    assert_eq!(permissions.ok(), Some(Vec::new()));
    assert_eq!(store.permission_reads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn variables_are_substituted_after_the_shared_cache() {
    let policy = PolicyId::new();
    let (fetcher, store) = fetcher(vec![
        Permission::new(policy, "articles", PermissionAction::Read, fields(&["*"]))
            .with_rule(Filter::new(json!({ "owner": { "_eq": "$CURRENT_USER" } }))),
    ]);
    let (alice, bob) = (UserId::new(), UserId::new());

    let for_alice = fetcher
        .fetch_permissions(
            PermissionAction::Read,
            &[policy],
            None,
            Some(&Accountability::for_user(alice, vec![RoleId::new()])),
        )
        .await
        .unwrap_or_default();
    let for_bob = fetcher
        .fetch_permissions(
            PermissionAction::Read,
            &[policy],
            None,
            Some(&Accountability::for_user(bob, Vec::new())),
        )
        .await
        .unwrap_or_default();

    assert_eq!(
        for_alice[0].rule,
        Some(Filter::new(json!({ "owner": { "_eq": alice.to_string() } })))
    );
    assert_eq!(
        for_bob[0].rule,
        Some(Filter::new(json!({ "owner": { "_eq": bob.to_string() } })))
    );
    assert_eq!(store.permission_reads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn collection_order_does_not_split_the_cache() {
    let policy = PolicyId::new();
    let (fetcher, store) = fetcher(Vec::new());

    let _ = fetcher
        .fetch_permissions(
            PermissionAction::Read,
            &[policy],
            Some(["b".to_owned(), "a".to_owned()].as_slice()),
            None,
        )
        .await;
    let _ = fetcher
        .fetch_permissions(
            PermissionAction::Read,
            &[policy],
            Some(["a".to_owned(), "b".to_owned(), "a".to_owned()].as_slice()),
            None,
        )
        .await;

    assert_eq!(store.permission_reads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn deduped_access_groups_per_collection_and_rule() {
    let (first, second) = (PolicyId::new(), PolicyId::new());
    let (fetcher, _) = fetcher(vec![
        Permission::new(first, "articles", PermissionAction::Read, fields(&["title"])),
        Permission::new(second, "articles", PermissionAction::Read, fields(&["body"]))
            .with_rule(Filter::empty()),
        Permission::new(second, "comments", PermissionAction::Read, fields(&["body"]))
            .with_rule(Filter::new(json!({ "status": { "_eq": "published" } }))),
    ]);

    let access = fetcher
        .fetch_deduped(PermissionAction::Read, &[first, second], None, None)
        .await
        .unwrap_or_default();

    assert_eq!(access.len(), 2);
    let articles = access.get("articles").cloned().unwrap_or_default();
    assert_eq!(articles.len(), 1);
    assert_eq!(articles[0].field_list(), fields(&["body", "title"]));
    assert!(articles[0].rule.is_empty());
}

#[tokio::test]
async fn permission_events_evict_cached_rows() {
    let policy = PolicyId::new();
    let store = Arc::new(FakePermissionStore::new(Vec::new(), Vec::new()));
    let cache = new_cache();
    let fetcher = PermissionFetcher::new(store.clone(), cache.clone());

    let before = fetcher
        .fetch_permissions(PermissionAction::Read, &[policy], None, None)
        .await
        .unwrap_or_default();
    assert!(before.is_empty());

    store.permissions.lock().await.push(Permission::new(
        policy,
        "articles",
        PermissionAction::Read,
        fields(&["*"]),
    ));
    cache
        .bus()
        .emit(events::PERMISSIONS_CREATE, &EventPayload::default())
        .await;

    let after = fetcher
        .fetch_permissions(PermissionAction::Read, &[policy], None, None)
        .await
        .unwrap_or_default();
    assert_eq!(after.len(), 1);
}
