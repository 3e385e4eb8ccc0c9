//! Keyward access resolution inspector.
//!
//! Wires the configured permission store and cache backend, runs one
//! resolution command for the configured accountability and prints the
//! result as JSON.

#![forbid(unsafe_code)]

mod command;
mod fixture_import;
mod inspector_config;

use std::env;
use std::sync::Arc;

use keyward_application::{
    AccessService, CacheStore, EventBus, ExecutionEngine, PermissionStore, QueryTreeBuilder,
    ResultCache,
};
use keyward_core::AppError;
use keyward_domain::Query;
use keyward_infrastructure::{
    InMemoryCacheStore, InMemoryPermissionStore, InMemoryRowStore, PermissionFixture,
    PostgresPermissionStore, RedisCacheStore, SchemaQueryTreeBuilder,
};
use serde_json::{Value, json};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::command::Command;
use crate::fixture_import::import_then_clear;
use crate::inspector_config::{
    CacheBackendConfig, InspectorConfig, PermissionStoreConfig, init_tracing,
};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let arguments: Vec<String> = env::args().skip(1).collect();
    let command = Command::parse(arguments.as_slice())?;
    let config = InspectorConfig::load()?;
    let fixture = config.load_fixture()?;

    match command {
        Command::Migrate => {
            let pool = connect_pool(&config).await?;
            run_migrations(&pool).await?;
            info!("database migrations applied successfully");
            return Ok(());
        }
        Command::Import => {
            let pool = connect_pool(&config).await?;
            run_migrations(&pool).await?;
            let store = PostgresPermissionStore::new(pool);
            let cache = ResultCache::new(build_cache_store(&config)?, Arc::new(EventBus::new()));
            import_then_clear(store.import_fixture(&fixture), &cache).await?;
            info!(
                access_rows = fixture.access.len(),
                permissions = fixture.permissions.len(),
                "permission fixture imported"
            );
            return Ok(());
        }
        _ => {}
    }

    let store = build_permission_store(&config, &fixture).await?;
    let cache = Arc::new(ResultCache::new(
        build_cache_store(&config)?,
        Arc::new(EventBus::new()),
    ));
    let schema = Arc::new(fixture.schema.clone());
    let tree_builder = Arc::new(SchemaQueryTreeBuilder::new(schema.clone()));
    let engine = Arc::new(InMemoryRowStore::from_fixture(&fixture));
    let service = AccessService::new(
        store,
        tree_builder.clone(),
        engine.clone(),
        cache,
        schema,
    );

    info!(
        user = ?config.accountability.user(),
        roles = config.accountability.roles().len(),
        admin = config.accountability.is_admin(),
        app = config.accountability.has_app_access(),
        ip = ?config.accountability.ip(),
        origin = config.accountability.origin(),
        user_agent = config.accountability.user_agent(),
        "keyward-inspector resolving"
    );

    let accountability = &config.accountability;
    let output = match command {
        Command::Migrate | Command::Import => Value::Null,
        Command::Policies => to_json(&service.resolve_policies(accountability).await?)?,
        Command::GlobalAccess => to_json(&service.resolve_global_access(accountability).await?)?,
        Command::FieldMap { action } => to_json(
            &service
                .inconsistent_field_map(Some(accountability), action)
                .await?,
        )?,
        Command::AllowedFields { action, collection } => to_json(
            &service
                .allowed_fields(accountability, action, collection.as_str())
                .await?,
        )?,
        Command::Authorize {
            action,
            collection,
            fields,
        } => {
            let query = Query {
                fields,
                ..Query::default()
            };
            let mut tree = tree_builder
                .build_tree(collection.as_str(), &query, accountability)
                .await?;
            service
                .authorize_and_rewrite(&mut tree, action, accountability)
                .await?;
            let rows = engine.execute(&tree).await?;
            json!({ "tree": to_json(&tree)?, "rows": rows })
        }
        Command::Validate {
            action,
            collection,
            keys,
        } => match service
            .validate_access(accountability, action, collection.as_str(), Some(keys.as_slice()))
            .await
        {
            Ok(()) => json!({ "allowed": true }),
            Err(error) if error.is_forbidden() => {
                json!({ "allowed": false, "reason": error.to_string() })
            }
            Err(error) => return Err(error),
        },
    };

    let rendered = serde_json::to_string_pretty(&output)
        .map_err(|error| AppError::Internal(format!("failed to render output: {error}")))?;
    println!("{rendered}");

    Ok(())
}

async fn build_permission_store(
    config: &InspectorConfig,
    fixture: &PermissionFixture,
) -> Result<Arc<dyn PermissionStore>, AppError> {
    match &config.permission_store {
        PermissionStoreConfig::Fixture => Ok(Arc::new(InMemoryPermissionStore::from_fixture(
            fixture,
        ))),
        PermissionStoreConfig::Postgres { .. } => {
            let pool = connect_pool(config).await?;
            Ok(Arc::new(PostgresPermissionStore::new(pool)))
        }
    }
}

fn build_cache_store(config: &InspectorConfig) -> Result<Arc<dyn CacheStore>, AppError> {
    match &config.cache_backend {
        CacheBackendConfig::Memory => Ok(Arc::new(InMemoryCacheStore::new(
            config.cache_ttl_seconds,
        ))),
        CacheBackendConfig::Redis { redis_url } => {
            let client = redis::Client::open(redis_url.as_str()).map_err(|error| {
                AppError::Validation(format!("invalid REDIS_URL: {error}"))
            })?;
            Ok(Arc::new(RedisCacheStore::new(
                client,
                "keyward:cache",
                config.cache_ttl_seconds,
            )))
        }
    }
}

async fn connect_pool(config: &InspectorConfig) -> Result<PgPool, AppError> {
    let PermissionStoreConfig::Postgres { database_url } = &config.permission_store else {
        return Err(AppError::Validation(
            "KEYWARD_PERMISSION_STORE must be 'postgres' for database commands".to_owned(),
        ));
    };

    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url.as_str())
        .await
        .map_err(|error| AppError::Internal(format!("failed to connect to database: {error}")))
}

async fn run_migrations(pool: &PgPool) -> Result<(), AppError> {
    sqlx::migrate!("../../crates/infrastructure/migrations")
        .run(pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to run migrations: {error}")))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, AppError> {
    serde_json::to_value(value)
        .map_err(|error| AppError::Internal(format!("failed to encode output: {error}")))
}
