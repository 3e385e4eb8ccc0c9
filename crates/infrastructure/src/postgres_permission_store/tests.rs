use keyward_application::{AccessRowFilter, PermissionQuery, PermissionStore};
use keyward_core::{PolicyId, RoleId, UserId};
use keyward_domain::{AccessRow, Filter, Permission, PermissionAction, Policy};
use serde_json::json;
use sqlx::PgPool;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;

use crate::PermissionFixture;

use super::PostgresPermissionStore;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

async fn test_pool() -> Option<PgPool> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        return None;
    };

    let pool = match PgPoolOptions::new()
        .max_connections(2)
        .connect(database_url.as_str())
        .await
    {
        Ok(pool) => pool,
        Err(error) => panic!("failed to connect to DATABASE_URL in test: {error}"),
    };

    if let Err(error) = MIGRATOR.run(&pool).await {
        panic!("failed to run migrations for postgres permission store tests: {error}");
    }

    Some(pool)
}

#[tokio::test]
async fn imported_access_rows_are_selected_by_role_and_user() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let store = PostgresPermissionStore::new(pool);
    let (role, user) = (RoleId::new(), UserId::new());
    let restricted = Policy {
        ip_access: Some(vec!["10.0.0.0/8".to_owned()]),
        ..Policy::new(PolicyId::new())
    };
    let fixture = PermissionFixture {
        access: vec![
            AccessRow {
                policy: restricted.clone(),
                role: Some(role),
                user: None,
                sort: Some(2),
            },
            AccessRow {
                policy: Policy::new(PolicyId::new()),
                role: None,
                user: Some(user),
                sort: None,
            },
            AccessRow {
                policy: Policy::new(PolicyId::new()),
                role: Some(RoleId::new()),
                user: None,
                sort: None,
            },
        ],
        ..PermissionFixture::default()
    };

    assert!(store.import_fixture(&fixture).await.is_ok());

    let rows = store
        .list_access_rows(&AccessRowFilter {
            roles: vec![role],
            user: Some(user),
        })
        .await;

    assert!(rows.is_ok());
    let rows = rows.unwrap_or_default();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].policy, restricted);
    assert_eq!(rows[0].sort, Some(2));
    assert_eq!(rows[1].user, Some(user));
}

#[tokio::test]
async fn permissions_are_scoped_to_policies_action_and_collections() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let store = PostgresPermissionStore::new(pool);
    let policy = PolicyId::new();
    let rule = Filter::new(json!({ "owner": { "_eq": "$CURRENT_USER" } }));
    let fixture = PermissionFixture {
        permissions: vec![
            Permission::new(
                policy,
                "articles",
                PermissionAction::Read,
                vec!["id".to_owned(), "title".to_owned()],
            )
            .with_rule(rule.clone()),
            Permission::new(policy, "pages", PermissionAction::Read, vec!["*".to_owned()]),
            Permission::new(policy, "articles", PermissionAction::Update, vec!["*".to_owned()]),
        ],
        ..PermissionFixture::default()
    };

    assert!(store.import_fixture(&fixture).await.is_ok());

    let scoped = store
        .list_permissions(&PermissionQuery {
            policies: vec![policy],
            action: PermissionAction::Read,
            collections: Some(vec!["articles".to_owned()]),
        })
        .await
        .unwrap_or_default();
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].rule, Some(rule));
    assert_eq!(scoped[0].fields, vec!["id".to_owned(), "title".to_owned()]);

    let unscoped = store
        .list_permissions(&PermissionQuery {
            policies: vec![policy],
            action: PermissionAction::Read,
            collections: None,
        })
        .await
        .unwrap_or_default();
    assert_eq!(unscoped.len(), 2);
}
