use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

const WILDCARD: &str = "*";

/// Set operation used when combining two field grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldMergeMode {
    /// Intersection; `*` is the universal set.
    And,
    /// Union; `*` absorbs everything.
    Or,
}

/// Combines two field grants.
///
/// `None` and empty lists grant nothing. The result is sorted and free of
/// duplicates, so the operation is commutative up to list equality.
#[must_use]
pub fn merge_fields(
    left: Option<&[String]>,
    right: Option<&[String]>,
    mode: FieldMergeMode,
) -> Vec<String> {
    let left = left.unwrap_or_default();
    let right = right.unwrap_or_default();
    let left_wildcard = contains_wildcard(left);
    let right_wildcard = contains_wildcard(right);

    let merged: BTreeSet<&str> = match mode {
        FieldMergeMode::And => {
            if left.is_empty() || right.is_empty() {
                BTreeSet::new()
            } else if left_wildcard && right_wildcard {
                BTreeSet::from([WILDCARD])
            } else if left_wildcard {
                right.iter().map(String::as_str).collect()
            } else if right_wildcard {
                left.iter().map(String::as_str).collect()
            } else {
                let right: BTreeSet<&str> = right.iter().map(String::as_str).collect();
                left.iter()
                    .map(String::as_str)
                    .filter(|field| right.contains(field))
                    .collect()
            }
        }
        FieldMergeMode::Or => {
            if left_wildcard || right_wildcard {
                BTreeSet::from([WILDCARD])
            } else {
                left.iter().chain(right).map(String::as_str).collect()
            }
        }
    };

    merged.into_iter().map(str::to_owned).collect()
}

/// Returns whether a field grant covers the field, directly or through `*`.
#[must_use]
pub fn field_set_covers<'a, I>(fields: I, field: &str) -> bool
where
    I: IntoIterator<Item = &'a String>,
{
    fields
        .into_iter()
        .any(|granted| granted == WILDCARD || granted == field)
}

fn contains_wildcard(fields: &[String]) -> bool {
    fields.iter().any(|field| field == WILDCARD)
}
