use std::collections::{BTreeMap, BTreeSet};

use keyward_core::PolicyId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{FieldMergeMode, Filter, FilterContext, PermissionAction, merge_fields};

/// One `(policy, collection, action)` permission rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permission {
    /// Policy the permission belongs to.
    pub policy: PolicyId,
    /// Collection the rule applies to.
    pub collection: String,
    /// Action granted by the rule.
    pub action: PermissionAction,
    /// Row filter; `None` or `{}` allows every row.
    #[serde(default)]
    pub rule: Option<Filter>,
    /// Payload validation filter for writes.
    #[serde(default)]
    pub validation: Option<Filter>,
    /// Default values applied to written payloads.
    #[serde(default)]
    pub presets: Option<Map<String, Value>>,
    /// Granted fields; may contain `*`.
    #[serde(default)]
    pub fields: Vec<String>,
}

impl Permission {
    /// Creates a permission that grants `fields` on every row.
    #[must_use]
    pub fn new(
        policy: PolicyId,
        collection: impl Into<String>,
        action: PermissionAction,
        fields: Vec<String>,
    ) -> Self {
        Self {
            policy,
            collection: collection.into(),
            action,
            rule: None,
            validation: None,
            presets: None,
            fields,
        }
    }

    /// Returns a copy restricted by a row filter.
    #[must_use]
    pub fn with_rule(mut self, rule: Filter) -> Self {
        self.rule = Some(rule);
        self
    }

    /// Returns a copy with dynamic variables substituted in rule, validation
    /// and presets.
    #[must_use]
    pub fn resolve_variables(&self, context: &FilterContext) -> Self {
        Self {
            rule: self
                .rule
                .as_ref()
                .map(|rule| rule.resolve_variables(context)),
            validation: self
                .validation
                .as_ref()
                .map(|validation| validation.resolve_variables(context)),
            presets: self.presets.as_ref().map(|presets| {
                presets
                    .iter()
                    .map(|(key, value)| (key.clone(), context.resolve_value(value)))
                    .collect()
            }),
            ..self.clone()
        }
    }
}

/// Row filter and the fields it grants, merged across permissions sharing the
/// same canonical rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupedAccess {
    /// Canonical row filter; `{}` allows every row.
    pub rule: Filter,
    /// Granted fields; may contain `*`.
    pub fields: BTreeSet<String>,
}

impl DedupedAccess {
    /// Returns whether the entry grants the field.
    #[must_use]
    pub fn covers(&self, field: &str) -> bool {
        crate::field_set_covers(&self.fields, field)
    }

    /// Returns the granted fields as a list.
    #[must_use]
    pub fn field_list(&self) -> Vec<String> {
        self.fields.iter().cloned().collect()
    }
}

/// Groups permissions by canonical rule and unions their fields.
///
/// Output is ordered by canonical rule, so it does not depend on input order.
#[must_use]
pub fn dedupe_access(permissions: &[Permission]) -> Vec<DedupedAccess> {
    let mut grouped: BTreeMap<String, (Filter, Vec<String>)> = BTreeMap::new();

    for permission in permissions {
        let rule = permission.rule.clone().unwrap_or_default().canonical();
        let key = rule.as_value().to_string();
        let entry = grouped.entry(key).or_insert_with(|| (rule, Vec::new()));
        entry.1 = merge_fields(
            Some(entry.1.as_slice()),
            Some(permission.fields.as_slice()),
            FieldMergeMode::Or,
        );
    }

    grouped
        .into_values()
        .map(|(rule, fields)| DedupedAccess {
            rule,
            fields: fields.into_iter().collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use keyward_core::PolicyId;
    use proptest::prelude::*;
    use serde_json::json;

    use crate::{Filter, PermissionAction};

    use super::{Permission, dedupe_access};

    fn permission(rule: Option<serde_json::Value>, fields: &[&str]) -> Permission {
        Permission {
            rule: rule.map(Filter::new),
            ..Permission::new(
                PolicyId::new(),
                "articles",
                PermissionAction::Read,
                fields.iter().map(|field| (*field).to_owned()).collect(),
            )
        }
    }

    #[test]
    fn null_and_empty_rules_merge() {
        let deduped = dedupe_access(&[
            permission(Some(json!({})), &["title"]),
            permission(None, &["body"]),
        ]);

        assert_eq!(deduped.len(), 1);
        assert!(deduped[0].rule.is_empty());
        assert_eq!(
            deduped[0].fields,
            BTreeSet::from(["body".to_owned(), "title".to_owned()])
        );
    }

    #[test]
    fn reordered_rules_merge() {
        let deduped = dedupe_access(&[
            permission(Some(json!({ "_and": [{ "a": 1 }, { "b": 2 }] })), &["a"]),
            permission(Some(json!({ "_and": [{ "b": 2 }, { "a": 1 }] })), &["b"]),
        ]);

        assert_eq!(deduped.len(), 1);
        assert_eq!(
            deduped[0].fields,
            BTreeSet::from(["a".to_owned(), "b".to_owned()])
        );
    }

    #[test]
    fn distinct_rules_stay_apart() {
        let deduped = dedupe_access(&[
            permission(Some(json!({ "owner": { "_eq": "$CURRENT_USER" } })), &["*"]),
            permission(None, &["title"]),
        ]);

        assert_eq!(deduped.len(), 2);
        assert!(deduped.iter().any(|entry| entry.covers("body")));
    }

    #[test]
    fn wildcard_absorbs_merged_fields() {
        let deduped = dedupe_access(&[permission(None, &["title"]), permission(None, &["*"])]);
        assert_eq!(deduped[0].fields, BTreeSet::from(["*".to_owned()]));
    }

    proptest! {
        #[test]
        fn output_ignores_input_order(rotation in 0usize..4) {
            let mut permissions = vec![
                permission(Some(json!({ "_and": [{ "a": 1 }, { "b": 2 }] })), &["a"]),
                permission(None, &["title"]),
                permission(Some(json!({ "_and": [{ "b": 2 }, { "a": 1 }] })), &["c"]),
                permission(Some(json!({})), &["body"]),
            ];
            let expected = dedupe_access(&permissions);
            permissions.rotate_left(rotation);
            prop_assert_eq!(dedupe_access(&permissions), expected);
        }
    }
}
