use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::filter::strip_function;
use crate::{Filter, FilterReference};

/// Query tree handed from the tree builder to the permission processor and on
/// to the execution engine.
pub type QueryTree = CollectionNode;

/// Node-level query options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeQuery {
    /// Row filter, including any injected permission filter.
    #[serde(default)]
    pub filter: Option<Filter>,
    /// Sort fields; a leading `-` sorts descending.
    #[serde(default)]
    pub sort: Vec<String>,
    /// Grouping fields.
    #[serde(default)]
    pub group_by: Vec<String>,
    /// Maximum rows returned.
    #[serde(default)]
    pub limit: Option<usize>,
    /// Rows skipped before the first returned row.
    #[serde(default)]
    pub offset: Option<usize>,
}

impl TreeQuery {
    /// AND-combines `filter` into the existing row filter.
    pub fn constrain(&mut self, filter: Filter) {
        self.filter = Filter::all_of(self.filter.take().into_iter().chain([filter]));
    }

    /// Lists fields read by the filter, sort and grouping.
    #[must_use]
    pub fn references(&self) -> Vec<FilterReference> {
        let mut references = self
            .filter
            .as_ref()
            .map(Filter::references)
            .unwrap_or_default();

        let paths = self
            .sort
            .iter()
            .map(|sort| sort.strip_prefix('-').unwrap_or(sort))
            .chain(self.group_by.iter().map(String::as_str));

        for path in paths {
            let mut segments = path.split('.');
            let Some(field) = segments.next().filter(|field| !field.is_empty()) else {
                continue;
            };
            let nested = path_filter(segments);
            references.push(FilterReference {
                field: strip_function(field).to_owned(),
                nested,
            });
        }

        references
    }
}

/// Builds `{ "b": { "c": {} } }` for the remaining segments `b.c` of a path.
fn path_filter<'a, I>(segments: I) -> Option<Filter>
where
    I: DoubleEndedIterator<Item = &'a str>,
{
    let mut value: Option<Value> = None;
    for segment in segments.rev() {
        let mut object = Map::new();
        object.insert(
            strip_function(segment).to_owned(),
            value.take().unwrap_or_else(|| Value::Object(Map::new())),
        );
        value = Some(Value::Object(object));
    }

    value.map(Filter::new)
}

/// Collection scope within a query tree: the root, or one branch of a relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionNode {
    /// Collection read at this scope.
    pub collection: String,
    /// Query options for this scope.
    #[serde(default)]
    pub query: TreeQuery,
    /// Selected fields, function fields and relations.
    #[serde(default)]
    pub children: Vec<ChildNode>,
    /// Permission rules matched per row; filled in by the permission processor.
    #[serde(default)]
    pub cases: Vec<Filter>,
}

impl CollectionNode {
    /// Creates a scope selecting `children` from `collection`.
    #[must_use]
    pub fn new(collection: impl Into<String>, children: Vec<ChildNode>) -> Self {
        Self {
            collection: collection.into(),
            query: TreeQuery::default(),
            children,
            cases: Vec::new(),
        }
    }

    /// Returns a copy with query options replaced.
    #[must_use]
    pub fn with_query(mut self, query: TreeQuery) -> Self {
        self.query = query;
        self
    }
}

/// Child of a collection scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChildNode {
    /// Plain column.
    Field(FieldNode),
    /// Function applied to a column or a relation, such as `year(date)`.
    FunctionField(FunctionFieldNode),
    /// Related collection(s).
    Nested(NestedCollectionNode),
}

impl ChildNode {
    /// Returns the field of the parent collection this child reads.
    #[must_use]
    pub fn referenced_field(&self) -> &str {
        match self {
            Self::Field(node) => node.name.as_str(),
            Self::FunctionField(node) => node.field.as_str(),
            Self::Nested(node) => node.field.as_str(),
        }
    }

    /// Returns the indices of the parent cases granting this child.
    #[must_use]
    pub fn when_case(&self) -> &[usize] {
        match self {
            Self::Field(node) => node.when_case.as_slice(),
            Self::FunctionField(node) => node.when_case.as_slice(),
            Self::Nested(node) => node.when_case.as_slice(),
        }
    }

    /// Replaces the indices of the parent cases granting this child.
    pub fn set_when_case(&mut self, when_case: Vec<usize>) {
        match self {
            Self::Field(node) => node.when_case = when_case,
            Self::FunctionField(node) => node.when_case = when_case,
            Self::Nested(node) => node.when_case = when_case,
        }
    }
}

/// Plain column selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldNode {
    /// Column name.
    pub name: String,
    /// Key used in the response, which may be an alias.
    pub field_key: String,
    /// Parent case indices granting the column.
    #[serde(default)]
    pub when_case: Vec<usize>,
}

impl FieldNode {
    /// Selects a column under its own name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            field_key: name.clone(),
            name,
            when_case: Vec::new(),
        }
    }
}

/// Function applied to one field of the parent collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionFieldNode {
    /// Function name, such as `count` or `year`.
    pub function: String,
    /// Field the function reads.
    pub field: String,
    /// Key used in the response.
    pub field_key: String,
    /// Collection behind `field` when it is a one-to-many alias.
    #[serde(default)]
    pub related_collection: Option<String>,
    /// Query applied to the related collection.
    #[serde(default)]
    pub query: TreeQuery,
    /// Related-collection rules; filled in by the permission processor.
    #[serde(default)]
    pub cases: Vec<Filter>,
    /// Parent case indices granting `field`.
    #[serde(default)]
    pub when_case: Vec<usize>,
}

impl FunctionFieldNode {
    /// Applies `function` to a column.
    #[must_use]
    pub fn new(function: impl Into<String>, field: impl Into<String>) -> Self {
        let function = function.into();
        let field = field.into();
        Self {
            field_key: format!("{function}({field})"),
            function,
            field,
            related_collection: None,
            query: TreeQuery::default(),
            cases: Vec::new(),
            when_case: Vec::new(),
        }
    }

    /// Returns a copy that aggregates over the related collection.
    #[must_use]
    pub fn over_relation(mut self, collection: impl Into<String>) -> Self {
        self.related_collection = Some(collection.into());
        self
    }
}

/// Relation shape between a parent scope and its nested scope(s).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// Parent row points at one related row.
    #[serde(rename = "m2o")]
    ManyToOne,
    /// Related rows point back at the parent row.
    #[serde(rename = "o2m")]
    OneToMany,
    /// Parent row points at one row of one of several collections.
    #[serde(rename = "a2o")]
    AnyToOne,
}

impl RelationKind {
    /// Returns the stable transport value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ManyToOne => "m2o",
            Self::OneToMany => "o2m",
            Self::AnyToOne => "a2o",
        }
    }
}

/// Related collection selection.
///
/// Many-to-one and one-to-many relations have exactly one branch; any-to-one
/// relations have one branch per allowed collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedCollectionNode {
    /// Relation shape.
    pub kind: RelationKind,
    /// Relation field (or alias) on the parent collection.
    pub field: String,
    /// Key used in the response.
    pub field_key: String,
    /// One scope per related collection.
    pub branches: Vec<CollectionNode>,
    /// Parent case indices granting `field`.
    #[serde(default)]
    pub when_case: Vec<usize>,
}

impl NestedCollectionNode {
    /// Selects a many-to-one relation.
    #[must_use]
    pub fn many_to_one(field: impl Into<String>, branch: CollectionNode) -> Self {
        Self::build(RelationKind::ManyToOne, field.into(), vec![branch])
    }

    /// Selects a one-to-many relation.
    #[must_use]
    pub fn one_to_many(field: impl Into<String>, branch: CollectionNode) -> Self {
        Self::build(RelationKind::OneToMany, field.into(), vec![branch])
    }

    /// Selects an any-to-one relation.
    #[must_use]
    pub fn any_to_one(field: impl Into<String>, branches: Vec<CollectionNode>) -> Self {
        Self::build(RelationKind::AnyToOne, field.into(), branches)
    }

    fn build(kind: RelationKind, field: String, branches: Vec<CollectionNode>) -> Self {
        Self {
            kind,
            field_key: field.clone(),
            field,
            branches,
            when_case: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::Filter;

    use super::{ChildNode, CollectionNode, FieldNode, NestedCollectionNode, TreeQuery};

    #[test]
    fn constrain_and_combines_filters() {
        let mut query = TreeQuery {
            filter: Some(Filter::new(json!({ "status": { "_eq": "published" } }))),
            ..TreeQuery::default()
        };
        query.constrain(Filter::new(json!({ "owner": { "_eq": "me" } })));

        assert_eq!(
            query.filter,
            Some(Filter::new(json!({ "_and": [
                { "status": { "_eq": "published" } },
                { "owner": { "_eq": "me" } }
            ] })))
        );
    }

    #[test]
    fn constrain_with_unrestricted_filter_is_a_no_op() {
        let mut query = TreeQuery::default();
        query.constrain(Filter::empty());
        assert!(query.filter.is_none());
    }

    #[test]
    fn references_include_sort_and_group_paths() {
        let query = TreeQuery {
            sort: vec!["-date_created".to_owned(), "author.name".to_owned()],
            group_by: vec!["status".to_owned()],
            ..TreeQuery::default()
        };

        let references = query.references();
        let fields: Vec<&str> = references
            .iter()
            .map(|reference| reference.field.as_str())
            .collect();
        assert_eq!(fields, vec!["date_created", "author", "status"]);
        assert_eq!(
            references[1].nested,
            Some(Filter::new(json!({ "name": {} })))
        );
    }

    #[test]
    fn function_wrapped_sort_and_group_paths_reference_the_inner_field() {
        let query = TreeQuery {
            sort: vec!["-year(date_created)".to_owned()],
            group_by: vec!["author.month(joined)".to_owned()],
            ..TreeQuery::default()
        };

        let references = query.references();

        assert_eq!(references[0].field, "date_created");
        assert_eq!(references[0].nested, None);
        assert_eq!(references[1].field, "author");
        assert_eq!(
            references[1].nested,
            Some(Filter::new(json!({ "joined": {} })))
        );
    }

    #[test]
    fn child_reports_parent_field() {
        let nested = ChildNode::Nested(NestedCollectionNode::many_to_one(
            "author",
            CollectionNode::new("users", vec![ChildNode::Field(FieldNode::new("name"))]),
        ));
        assert_eq!(nested.referenced_field(), "author");
    }
}
