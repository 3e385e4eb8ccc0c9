use async_trait::async_trait;
use keyward_core::{Accountability, AppResult, PolicyId, RoleId, UserId};
use keyward_domain::{AccessRow, Permission, PermissionAction, Query, QueryTree};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Row returned by the execution engine.
pub type Row = Map<String, Value>;

/// Selection of access rows for one caller.
///
/// With no roles only public rows (no role, no user) match; otherwise rows of
/// any listed role match. Rows attached to `user` always match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRowFilter {
    /// Role chain of the caller.
    pub roles: Vec<RoleId>,
    /// Authenticated user, if any.
    pub user: Option<UserId>,
}

impl AccessRowFilter {
    /// Returns whether an access row is selected.
    #[must_use]
    pub fn matches(&self, row: &AccessRow) -> bool {
        let role_match = if self.roles.is_empty() {
            row.role.is_none() && row.user.is_none()
        } else {
            row.role.is_some_and(|role| self.roles.contains(&role))
        };

        role_match || (self.user.is_some() && row.user == self.user)
    }
}

/// Selection of permission rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionQuery {
    /// Policies the permissions must belong to.
    pub policies: Vec<PolicyId>,
    /// Action the permissions must grant.
    pub action: PermissionAction,
    /// Collections to restrict to; `None` selects all.
    pub collections: Option<Vec<String>>,
}

impl PermissionQuery {
    /// Returns whether a permission row is selected.
    #[must_use]
    pub fn matches(&self, permission: &Permission) -> bool {
        permission.action == self.action
            && self.policies.contains(&permission.policy)
            && self
                .collections
                .as_ref()
                .is_none_or(|collections| collections.contains(&permission.collection))
    }
}

/// Read port for the permission, policy and role store.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    /// Lists access rows (with their policy) selected by the filter.
    async fn list_access_rows(&self, filter: &AccessRowFilter) -> AppResult<Vec<AccessRow>>;

    /// Lists permission rows selected by the query.
    async fn list_permissions(&self, query: &PermissionQuery) -> AppResult<Vec<Permission>>;
}

/// Port turning a client query into a query tree.
#[async_trait]
pub trait QueryTreeBuilder: Send + Sync {
    /// Builds the tree for `query` on `collection`.
    async fn build_tree(
        &self,
        collection: &str,
        query: &Query,
        accountability: &Accountability,
    ) -> AppResult<QueryTree>;
}

/// Port running an authorized query tree against storage.
///
/// Dropping the returned future must abort the underlying query.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Executes the tree and returns the root rows.
    async fn execute(&self, tree: &QueryTree) -> AppResult<Vec<Row>>;
}

#[cfg(test)]
mod tests {
    use keyward_core::{PolicyId, RoleId, UserId};
    use keyward_domain::{AccessRow, Policy};

    use super::AccessRowFilter;

    fn row(role: Option<RoleId>, user: Option<UserId>) -> AccessRow {
        AccessRow {
            policy: Policy::new(PolicyId::new()),
            role,
            user,
            sort: None,
        }
    }

    #[test]
    fn public_filter_selects_only_unattached_rows() {
        let filter = AccessRowFilter {
            roles: Vec::new(),
            user: None,
        };

        assert!(filter.matches(&row(None, None)));
        assert!(!filter.matches(&row(Some(RoleId::new()), None)));
        assert!(!filter.matches(&row(None, Some(UserId::new()))));
    }

    #[test]
    fn scoped_filter_selects_roles_and_user() {
        let role = RoleId::new();
        let user = UserId::new();
        let filter = AccessRowFilter {
            roles: vec![role],
            user: Some(user),
        };

        assert!(filter.matches(&row(Some(role), None)));
        assert!(filter.matches(&row(None, Some(user))));
        assert!(!filter.matches(&row(None, None)));
        assert!(!filter.matches(&row(Some(RoleId::new()), None)));
        assert!(!filter.matches(&row(None, Some(UserId::new()))));
    }
}
