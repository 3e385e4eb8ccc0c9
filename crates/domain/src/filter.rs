use chrono::{DateTime, SecondsFormat, Utc};
use keyward_core::{Accountability, PolicyId, RoleId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const AND: &str = "_and";
const OR: &str = "_or";
const SOME: &str = "_some";
const NONE: &str = "_none";

/// Operators whose array operand is a set, so member order carries no meaning.
const UNORDERED_OPERATORS: &[&str] = &[AND, OR, "_in", "_nin", "_intersects", "_nintersects"];

/// Row filter tree in the `{ field: { _op: value } }` / `{ _and: [...] }` shape.
///
/// `null` and `{}` both mean "no restriction".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter(Value);

/// Field referenced by a filter, with the filter applied through it when the
/// field is a relation.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterReference {
    /// Field name in the filtered collection.
    pub field: String,
    /// Filter applied to the related collection, if any.
    pub nested: Option<Filter>,
}

impl Filter {
    /// Wraps a raw JSON filter.
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Returns the unrestricted filter `{}`.
    #[must_use]
    pub fn empty() -> Self {
        Self(Value::Object(Map::new()))
    }

    /// Returns the underlying JSON value.
    #[must_use]
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Consumes the filter into its JSON value.
    #[must_use]
    pub fn into_value(self) -> Value {
        self.0
    }

    /// Returns whether the filter restricts nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            Value::Null => true,
            Value::Object(object) => object.is_empty(),
            _ => false,
        }
    }

    /// Returns the canonical form: object keys sorted, set-like operator arrays
    /// sorted and deduplicated, `null` folded into `{}`.
    #[must_use]
    pub fn canonical(&self) -> Self {
        if self.is_empty() {
            return Self::empty();
        }

        Self(canonicalize(&self.0, false))
    }

    /// Returns a string key equal for structurally identical filters.
    #[must_use]
    pub fn canonical_key(&self) -> String {
        self.canonical().0.to_string()
    }

    /// Combines filters so a row matching any of them matches.
    ///
    /// Returns `None` when one of them is unrestricted. An empty input yields
    /// `{ "_or": [] }`, which matches no row.
    #[must_use]
    pub fn any_of<I>(filters: I) -> Option<Self>
    where
        I: IntoIterator<Item = Filter>,
    {
        let mut members: Vec<Value> = Vec::new();
        let mut seen = std::collections::BTreeSet::new();

        for filter in filters {
            if filter.is_empty() {
                return None;
            }
            if seen.insert(filter.canonical_key()) {
                members.push(filter.0);
            }
        }

        if members.len() == 1 {
            return members.pop().map(Self);
        }

        Some(Self(single_entry(OR, Value::Array(members))))
    }

    /// Combines filters so a row must match all of them.
    ///
    /// Returns `None` when every input is unrestricted.
    #[must_use]
    pub fn all_of<I>(filters: I) -> Option<Self>
    where
        I: IntoIterator<Item = Filter>,
    {
        let mut members: Vec<Value> = filters
            .into_iter()
            .filter(|filter| !filter.is_empty())
            .map(|filter| filter.0)
            .collect();

        match members.len() {
            0 => None,
            1 => members.pop().map(Self),
            _ => Some(Self(single_entry(AND, Value::Array(members)))),
        }
    }

    /// Substitutes dynamic variables such as `$CURRENT_USER` in every string
    /// leaf of the filter.
    #[must_use]
    pub fn resolve_variables(&self, context: &FilterContext) -> Self {
        Self(context.resolve_value(&self.0))
    }

    /// Lists the fields the filter reads, in first-seen order.
    #[must_use]
    pub fn references(&self) -> Vec<FilterReference> {
        let mut references = Vec::new();
        collect_references(&self.0, &mut references);
        references
    }
}

/// Values substituted for dynamic filter variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterContext {
    user: Option<UserId>,
    role: Option<RoleId>,
    roles: Vec<RoleId>,
    policies: Vec<PolicyId>,
    now: DateTime<Utc>,
}

impl FilterContext {
    /// Builds the substitution context for one accountability.
    #[must_use]
    pub fn new(accountability: &Accountability, policies: &[PolicyId]) -> Self {
        Self {
            user: accountability.user(),
            role: accountability.role(),
            roles: accountability.roles().to_vec(),
            policies: policies.to_vec(),
            now: Utc::now(),
        }
    }

    /// Pins the value of `$NOW`.
    #[must_use]
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Substitutes variables in an arbitrary JSON value, such as presets.
    #[must_use]
    pub fn resolve_value(&self, value: &Value) -> Value {
        match value {
            Value::String(text) => self
                .variable(text.as_str())
                .unwrap_or_else(|| value.clone()),
            Value::Array(items) => {
                Value::Array(items.iter().map(|item| self.resolve_value(item)).collect())
            }
            Value::Object(object) => Value::Object(
                object
                    .iter()
                    .map(|(key, item)| (key.clone(), self.resolve_value(item)))
                    .collect(),
            ),
            _ => value.clone(),
        }
    }

    fn variable(&self, name: &str) -> Option<Value> {
        match name {
            "$CURRENT_USER" => Some(
                self.user
                    .map_or(Value::Null, |user| Value::String(user.to_string())),
            ),
            "$CURRENT_ROLE" => Some(
                self.role
                    .map_or(Value::Null, |role| Value::String(role.to_string())),
            ),
            "$CURRENT_ROLES" => Some(Value::Array(
                self.roles
                    .iter()
                    .map(|role| Value::String(role.to_string()))
                    .collect(),
            )),
            "$CURRENT_POLICIES" => Some(Value::Array(
                self.policies
                    .iter()
                    .map(|policy| Value::String(policy.to_string()))
                    .collect(),
            )),
            "$NOW" => Some(Value::String(
                self.now.to_rfc3339_opts(SecondsFormat::Millis, true),
            )),
            _ => None,
        }
    }
}

fn single_entry(key: &str, value: Value) -> Value {
    let mut object = Map::new();
    object.insert(key.to_owned(), value);
    Value::Object(object)
}

fn canonicalize(value: &Value, unordered: bool) -> Value {
    match value {
        Value::Object(object) => {
            let mut entries: Vec<(&String, &Value)> = object.iter().collect();
            entries.sort_by(|left, right| left.0.cmp(right.0));

            let mut canonical = Map::new();
            for (key, item) in entries {
                let item_unordered = UNORDERED_OPERATORS.contains(&key.as_str());
                canonical.insert(key.clone(), canonicalize(item, item_unordered));
            }
            Value::Object(canonical)
        }
        Value::Array(items) => {
            let mut canonical: Vec<Value> =
                items.iter().map(|item| canonicalize(item, false)).collect();
            if unordered {
                canonical.sort_by_cached_key(Value::to_string);
                canonical.dedup();
            }
            Value::Array(canonical)
        }
        _ => value.clone(),
    }
}

fn collect_references(value: &Value, references: &mut Vec<FilterReference>) {
    let Value::Object(object) = value else {
        return;
    };

    for (key, item) in object {
        if key == AND || key == OR {
            if let Value::Array(members) = item {
                for member in members {
                    collect_references(member, references);
                }
            }
            continue;
        }

        if key.starts_with('_') {
            continue;
        }

        let field = strip_function(key.as_str()).to_owned();
        let nested = nested_filter(item);
        match references
            .iter_mut()
            .find(|reference| reference.field == field)
        {
            Some(existing) => {
                if let Some(nested) = nested {
                    existing.nested =
                        Filter::all_of(existing.nested.take().into_iter().chain([nested]));
                }
            }
            None => references.push(FilterReference { field, nested }),
        }
    }
}

fn nested_filter(value: &Value) -> Option<Filter> {
    let Value::Object(object) = value else {
        return None;
    };

    let mut relational = Map::new();
    let mut quantified = Vec::new();
    for (key, item) in object {
        if key == SOME || key == NONE {
            quantified.push(Filter(item.clone()));
        } else if !key.starts_with('_') {
            relational.insert(key.clone(), item.clone());
        }
    }

    let relational = (!relational.is_empty()).then(|| Filter(Value::Object(relational)));
    Filter::all_of(relational.into_iter().chain(quantified))
}

/// Returns `field` for a function-wrapped key such as `year(field)`.
pub(crate) fn strip_function(key: &str) -> &str {
    match (key.find('('), key.strip_suffix(')')) {
        (Some(open), Some(inner)) => &inner[open + 1..],
        _ => key,
    }
}
