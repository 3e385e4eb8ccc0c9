//! Access resolution services and the ports they depend on.

#![forbid(unsafe_code)]

mod access_ports;
mod access_service;
mod ast_processor;
mod cache_ports;
mod event_bus;
mod inconsistent_field_map;
mod item_access;
mod permission_fetcher;
mod policy_resolver;
mod result_cache;

#[cfg(test)]
mod test_support;

pub use access_ports::{
    AccessRowFilter, ExecutionEngine, PermissionQuery, PermissionStore, QueryTreeBuilder, Row,
};
pub use access_service::AccessService;
pub use ast_processor::AstPermissionProcessor;
pub use cache_ports::CacheStore;
pub use event_bus::{EventBus, EventHandler, EventPayload, SubscriptionId, events};
pub use inconsistent_field_map::{FieldMap, InconsistentFieldMapBuilder};
pub use item_access::ItemAccessValidator;
pub use permission_fetcher::{CollectionAccess, PermissionFetcher, dedupe_by_collection};
pub use policy_resolver::{PolicyContext, PolicyResolver};
pub use result_cache::{CacheEntry, CachedResolver, Resolve, ResultCache};
