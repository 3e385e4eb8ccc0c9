//! Infrastructure adapters for the access resolution ports.

#![forbid(unsafe_code)]

mod in_memory_cache_store;
mod in_memory_permission_store;
mod in_memory_row_store;
mod permission_fixture;
mod postgres_permission_store;
mod redis_cache_store;
mod schema_query_tree_builder;

pub use in_memory_cache_store::InMemoryCacheStore;
pub use in_memory_permission_store::InMemoryPermissionStore;
pub use in_memory_row_store::InMemoryRowStore;
pub use permission_fixture::PermissionFixture;
pub use postgres_permission_store::PostgresPermissionStore;
pub use redis_cache_store::RedisCacheStore;
pub use schema_query_tree_builder::SchemaQueryTreeBuilder;
