//! Domain entities and invariants.

#![forbid(unsafe_code)]

mod ast;
mod fields;
mod filter;
mod permission;
mod policy;
mod query;
mod schema;
mod security;

pub use ast::{
    ChildNode, CollectionNode, FieldNode, FunctionFieldNode, NestedCollectionNode, QueryTree,
    RelationKind, TreeQuery,
};
pub use fields::{FieldMergeMode, field_set_covers, merge_fields};
pub use filter::{Filter, FilterContext, FilterReference};
pub use permission::{DedupedAccess, Permission, dedupe_access};
pub use policy::{AccessRow, GlobalAccess, Policy};
pub use query::Query;
pub use schema::{CollectionSchema, RelationSchema, ResolvedRelation, SchemaOverview};
pub use security::PermissionAction;
