use serde::{Deserialize, Serialize};

use crate::{Filter, TreeQuery};

/// Client query before it is turned into a query tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// Requested field paths, such as `title`, `author.name`, `*` or `count(comments)`.
    #[serde(default)]
    pub fields: Vec<String>,
    /// Client row filter.
    #[serde(default)]
    pub filter: Option<Filter>,
    /// Sort fields; a leading `-` sorts descending.
    #[serde(default)]
    pub sort: Vec<String>,
    /// Grouping fields for aggregate queries.
    #[serde(default)]
    pub group_by: Vec<String>,
    /// Maximum rows returned.
    #[serde(default)]
    pub limit: Option<usize>,
    /// Rows skipped before the first returned row.
    #[serde(default)]
    pub offset: Option<usize>,
}

impl Query {
    /// Returns the node-level query carried by the tree root.
    #[must_use]
    pub fn to_tree_query(&self) -> TreeQuery {
        TreeQuery {
            filter: self.filter.clone(),
            sort: self.sort.clone(),
            group_by: self.group_by.clone(),
            limit: self.limit,
            offset: self.offset,
        }
    }
}
