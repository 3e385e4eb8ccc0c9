use std::collections::BTreeMap;

use keyward_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

use crate::RelationKind;

/// Schema facts the access engine needs: primary keys, fields and relations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaOverview {
    /// Collections keyed by name.
    #[serde(default)]
    pub collections: BTreeMap<String, CollectionSchema>,
    /// Relations between collections.
    #[serde(default)]
    pub relations: Vec<RelationSchema>,
}

/// One collection of the schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchema {
    /// Primary key field; `None` marks a broken schema.
    #[serde(default)]
    pub primary_key: Option<String>,
    /// Every field of the collection, aliases included.
    #[serde(default)]
    pub fields: Vec<String>,
}

/// Foreign key `collection.field`, pointing at `related_collection` or, for
/// any-to-one relations, at one of `one_allowed_collections`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationSchema {
    /// Collection holding the foreign key.
    pub collection: String,
    /// Foreign key field.
    pub field: String,
    /// Target collection; `None` for any-to-one relations.
    #[serde(default)]
    pub related_collection: Option<String>,
    /// Alias field on the target collection listing the referring rows.
    #[serde(default)]
    pub one_field: Option<String>,
    /// Allowed targets of an any-to-one relation.
    #[serde(default)]
    pub one_allowed_collections: Vec<String>,
}

/// Relation as seen from one side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRelation {
    /// Shape of the relation from the asking collection.
    pub kind: RelationKind,
    /// Collections reachable through the field.
    pub collections: Vec<String>,
}

impl SchemaOverview {
    /// Returns every collection name in order.
    #[must_use]
    pub fn collection_names(&self) -> Vec<String> {
        self.collections.keys().cloned().collect()
    }

    /// Returns the fields of a collection, or an empty slice for unknown ones.
    #[must_use]
    pub fn fields_of(&self, collection: &str) -> &[String] {
        self.collections
            .get(collection)
            .map(|schema| schema.fields.as_slice())
            .unwrap_or_default()
    }

    /// Returns the primary key field of a collection.
    pub fn primary_key(&self, collection: &str) -> AppResult<&str> {
        self.collections
            .get(collection)
            .and_then(|schema| schema.primary_key.as_deref())
            .ok_or_else(|| {
                AppError::Schema(format!(
                    "collection '{collection}' has no primary key defined"
                ))
            })
    }

    /// Resolves the relation behind `collection.field`, if there is one.
    #[must_use]
    pub fn relation(&self, collection: &str, field: &str) -> Option<ResolvedRelation> {
        for relation in &self.relations {
            if relation.collection == collection && relation.field == field {
                return Some(match &relation.related_collection {
                    Some(related) => ResolvedRelation {
                        kind: RelationKind::ManyToOne,
                        collections: vec![related.clone()],
                    },
                    None => ResolvedRelation {
                        kind: RelationKind::AnyToOne,
                        collections: relation.one_allowed_collections.clone(),
                    },
                });
            }

            if relation.related_collection.as_deref() == Some(collection)
                && relation.one_field.as_deref() == Some(field)
            {
                return Some(ResolvedRelation {
                    kind: RelationKind::OneToMany,
                    collections: vec![relation.collection.clone()],
                });
            }
        }

        None
    }
}
