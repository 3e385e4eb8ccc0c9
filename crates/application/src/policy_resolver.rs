use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use keyward_core::{Accountability, AppResult, PolicyId, RoleId, UserId};
use keyward_domain::{AccessRow, GlobalAccess, Policy};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;

use crate::{AccessRowFilter, CachedResolver, PermissionStore, Resolve, ResultCache, events};

/// Slice of an accountability that decides which policies apply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyContext {
    /// Role chain, most distant ancestor first.
    pub roles: Vec<RoleId>,
    /// Authenticated user, if any.
    pub user: Option<UserId>,
    /// Client address checked against `ip_access`.
    pub ip: Option<IpAddr>,
}

impl PolicyContext {
    /// Extracts the policy-relevant fields of an accountability.
    #[must_use]
    pub fn from_accountability(accountability: &Accountability) -> Self {
        Self {
            roles: accountability.roles().to_vec(),
            user: accountability.user(),
            ip: accountability.ip(),
        }
    }
}

/// Resolves the ordered policies applicable to a caller.
pub struct PolicyResolver {
    lookup: CachedResolver<AccessRowLookup>,
}

impl PolicyResolver {
    /// Creates a resolver reading access rows from `store`.
    #[must_use]
    pub fn new(store: Arc<dyn PermissionStore>, cache: Arc<ResultCache>) -> Self {
        Self {
            lookup: CachedResolver::new(cache, AccessRowLookup { store }),
        }
    }

    /// Returns the applicable policy ids, lowest precedence first.
    pub async fn resolve_policies(&self, context: &PolicyContext) -> AppResult<Vec<PolicyId>> {
        Ok(self
            .applicable_policies(context)
            .await?
            .into_iter()
            .map(|policy| policy.id)
            .collect())
    }

    /// Returns the admin and app flags granted by any applicable policy.
    pub async fn resolve_global_access(&self, context: &PolicyContext) -> AppResult<GlobalAccess> {
        let policies = self.applicable_policies(context).await?;
        Ok(GlobalAccess::from_policies(&policies))
    }

    /// Returns the applicable policies, lowest precedence first.
    pub async fn applicable_policies(&self, context: &PolicyContext) -> AppResult<Vec<Policy>> {
        self.lookup.call(context).await
    }
}

struct AccessRowLookup {
    store: Arc<dyn PermissionStore>,
}

#[async_trait]
impl Resolve for AccessRowLookup {
    type Input = PolicyContext;
    type Output = Vec<Policy>;

    fn namespace(&self) -> &'static str {
        "policies"
    }

    fn cache_key(&self, input: &PolicyContext) -> Value {
        json!({
            "roles": input.roles,
            "user": input.user,
            "ip": input.ip,
        })
    }

    async fn resolve(&self, input: &PolicyContext) -> AppResult<Vec<Policy>> {
        let filter = AccessRowFilter {
            roles: input.roles.clone(),
            user: input.user,
        };
        let mut rows = self.store.list_access_rows(&filter).await?;

        rows.retain(|row| {
            for entry in row.policy.invalid_ip_entries() {
                warn!(policy = %row.policy.id, entry, "ignoring invalid ip_access entry");
            }
            row.policy.allows_ip(input.ip)
        });
        order_access_rows(&mut rows, &input.roles);

        Ok(unique_policies(rows))
    }

    fn invalidate_on(&self, input: &PolicyContext, _output: &Vec<Policy>) -> Vec<&'static str> {
        let mut invalidating = vec![
            events::ACCESS_CREATE,
            events::ACCESS_UPDATE,
            events::ACCESS_DELETE,
            events::POLICIES_UPDATE,
            events::POLICIES_DELETE,
            events::ROLES_UPDATE,
            events::ROLES_DELETE,
        ];
        if input.user.is_some() {
            invalidating.extend([events::USERS_UPDATE, events::USERS_DELETE]);
        }
        invalidating
    }
}

/// Sorts rows of ancestor roles first and user attachments last.
///
/// Within one role, rows with a lower `sort` come first and rows without a
/// `sort` come last. The sort is stable.
fn order_access_rows(rows: &mut [AccessRow], roles: &[RoleId]) {
    rows.sort_by_key(|row| {
        let rank = row
            .role
            .and_then(|role| roles.iter().position(|candidate| *candidate == role))
            .unwrap_or(roles.len());
        (rank, row.sort.is_none(), row.sort)
    });
}

/// Keeps the highest-precedence (last) occurrence of each policy.
fn unique_policies(rows: Vec<AccessRow>) -> Vec<Policy> {
    let mut seen = HashSet::new();
    let mut policies: Vec<Policy> = rows
        .into_iter()
        .rev()
        .filter(|row| seen.insert(row.policy.id))
        .map(|row| row.policy)
        .collect();
    policies.reverse();
    policies
}
