use std::collections::BTreeMap;

use keyward_application::Row;
use keyward_core::{AppError, AppResult};
use keyward_domain::{AccessRow, Permission, SchemaOverview};
use serde::{Deserialize, Serialize};

/// Snapshot of schema, access rows, permissions and item rows loaded from JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PermissionFixture {
    /// Collections, primary keys and relations.
    #[serde(default)]
    pub schema: SchemaOverview,
    /// Policy attachments.
    #[serde(default)]
    pub access: Vec<AccessRow>,
    /// Permission rules.
    #[serde(default)]
    pub permissions: Vec<Permission>,
    /// Item rows per collection.
    #[serde(default)]
    pub rows: BTreeMap<String, Vec<Row>>,
}

impl PermissionFixture {
    /// Parses a fixture document.
    pub fn from_json(raw: &str) -> AppResult<Self> {
        serde_json::from_str(raw)
            .map_err(|error| AppError::Validation(format!("invalid permission fixture: {error}")))
    }
}

#[cfg(test)]
mod tests {
    use keyward_core::AppError;
    use keyward_domain::PermissionAction;

    use super::PermissionFixture;

    #[test]
    fn parses_a_complete_document() {
        let fixture = PermissionFixture::from_json(
            r#"{
                "schema": {
                    "collections": {
                        "articles": { "primary_key": "id", "fields": ["id", "title"] }
                    }
                },
                "access": [{
                    "policy": { "id": "6f1c1bb6-6bd4-4c3b-a5f0-1d3fa3c1d2a1", "app_access": true },
                    "role": "9b2d2f70-0c4c-4f0b-8a3c-63c1c4d6c0b1"
                }],
                "permissions": [{
                    "policy": "6f1c1bb6-6bd4-4c3b-a5f0-1d3fa3c1d2a1",
                    "collection": "articles",
                    "action": "read",
                    "rule": { "status": { "_eq": "published" } },
                    "fields": ["*"]
                }],
                "rows": { "articles": [{ "id": 1, "title": "Hello" }] }
            }"#,
        );

        assert!(fixture.is_ok());
        let fixture = fixture.unwrap_or_default();
        assert_eq!(fixture.access.len(), 1);
        assert!(fixture.access[0].policy.app_access);
        assert_eq!(fixture.permissions[0].action, PermissionAction::Read);
        assert_eq!(fixture.schema.primary_key("articles"), Ok("id"));
        assert_eq!(fixture.rows.get("articles").map(Vec::len), Some(1));
    }

    #[test]
    fn bundled_blog_fixture_parses() {
        let fixture = PermissionFixture::from_json(include_str!("../../../fixtures/blog.json"));

        assert!(fixture.is_ok());
        let fixture = fixture.unwrap_or_default();
        assert_eq!(fixture.schema.collection_names().len(), 3);
        assert_eq!(fixture.permissions.len(), 4);
        assert_eq!(fixture.rows.get("articles").map(Vec::len), Some(3));
    }

    #[test]
    fn malformed_documents_are_validation_errors() {
        let fixture = PermissionFixture::from_json(r#"{ "permissions": [{ "action": "read" }] }"#);

        assert!(matches!(fixture, Err(AppError::Validation(_))));
    }
}
