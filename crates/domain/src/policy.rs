use std::net::IpAddr;
use std::str::FromStr;

use ipnet::IpNet;
use keyward_core::{PolicyId, RoleId, UserId};
use serde::{Deserialize, Serialize};

/// Reusable bundle of permission rules, optionally restricted to networks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Stable policy id.
    pub id: PolicyId,
    /// Grants unrestricted access to everything.
    #[serde(default)]
    pub admin_access: bool,
    /// Grants access to the app surface.
    #[serde(default)]
    pub app_access: bool,
    /// CIDR blocks or single addresses allowed to use the policy; `None` is unrestricted.
    #[serde(default)]
    pub ip_access: Option<Vec<String>>,
}

impl Policy {
    /// Creates an unrestricted policy without admin or app access.
    #[must_use]
    pub fn new(id: PolicyId) -> Self {
        Self {
            id,
            admin_access: false,
            app_access: false,
            ip_access: None,
        }
    }

    /// Returns whether a caller at `ip` may use this policy.
    ///
    /// Restricted policies never apply to callers without a known IP.
    /// Unparseable entries match nothing.
    #[must_use]
    pub fn allows_ip(&self, ip: Option<IpAddr>) -> bool {
        let Some(entries) = &self.ip_access else {
            return true;
        };
        let Some(ip) = ip else {
            return false;
        };

        entries
            .iter()
            .filter_map(|entry| parse_ip_entry(entry.as_str()))
            .any(|network| network.contains(&ip))
    }

    /// Returns `ip_access` entries that are neither an address nor a CIDR block.
    #[must_use]
    pub fn invalid_ip_entries(&self) -> Vec<&str> {
        self.ip_access
            .iter()
            .flatten()
            .map(String::as_str)
            .filter(|entry| parse_ip_entry(entry).is_none())
            .collect()
    }
}

fn parse_ip_entry(entry: &str) -> Option<IpNet> {
    let entry = entry.trim();
    IpNet::from_str(entry)
        .ok()
        .or_else(|| IpAddr::from_str(entry).ok().map(IpNet::from))
}

/// Attachment of a policy to a role, a user, or the public.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRow {
    /// Attached policy.
    pub policy: Policy,
    /// Role the policy is attached to; `None` for user or public attachments.
    #[serde(default)]
    pub role: Option<RoleId>,
    /// User the policy is attached to.
    #[serde(default)]
    pub user: Option<UserId>,
    /// Ordering among rows of the same role.
    #[serde(default)]
    pub sort: Option<i32>,
}

/// Global flags derived from every applicable policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalAccess {
    /// Any applicable policy grants admin access.
    pub admin: bool,
    /// Any applicable policy grants app access.
    pub app: bool,
}

impl GlobalAccess {
    /// Folds the flags of a list of policies.
    #[must_use]
    pub fn from_policies<'a, I>(policies: I) -> Self
    where
        I: IntoIterator<Item = &'a Policy>,
    {
        policies
            .into_iter()
            .fold(Self::default(), |access, policy| Self {
                admin: access.admin || policy.admin_access,
                app: access.app || policy.app_access,
            })
    }
}
