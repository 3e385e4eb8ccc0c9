use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::{RoleId, UserId};

/// Resolved identity and request context of one caller.
///
/// `roles` is ordered from the most distant ancestor down to the caller's own
/// role. Authentication happens elsewhere; this value is trusted as given.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accountability {
    #[serde(default)]
    user: Option<UserId>,
    #[serde(default)]
    role: Option<RoleId>,
    #[serde(default)]
    roles: Vec<RoleId>,
    #[serde(default)]
    admin: bool,
    #[serde(default)]
    app: bool,
    #[serde(default)]
    ip: Option<IpAddr>,
    #[serde(default)]
    origin: Option<String>,
    #[serde(default)]
    user_agent: Option<String>,
}

impl Accountability {
    /// Creates the accountability of an anonymous caller.
    #[must_use]
    pub fn public() -> Self {
        Self::default()
    }

    /// Creates an accountability for an authenticated user.
    ///
    /// The caller's own role is the last entry of `roles`.
    #[must_use]
    pub fn for_user(user: UserId, roles: Vec<RoleId>) -> Self {
        Self {
            user: Some(user),
            role: roles.last().copied(),
            roles,
            ..Self::default()
        }
    }

    /// Creates an accountability that bypasses every permission check.
    #[must_use]
    pub fn admin() -> Self {
        Self {
            admin: true,
            app: true,
            ..Self::default()
        }
    }

    /// Returns the authenticated user, if any.
    #[must_use]
    pub fn user(&self) -> Option<UserId> {
        self.user
    }

    /// Returns the caller's own role, if any.
    #[must_use]
    pub fn role(&self) -> Option<RoleId> {
        self.role
    }

    /// Returns the role chain from root ancestor to own role.
    #[must_use]
    pub fn roles(&self) -> &[RoleId] {
        self.roles.as_slice()
    }

    /// Returns whether every check is bypassed.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.admin
    }

    /// Returns whether the caller may use the app surface.
    #[must_use]
    pub fn has_app_access(&self) -> bool {
        self.app
    }

    /// Returns the caller IP, if known.
    #[must_use]
    pub fn ip(&self) -> Option<IpAddr> {
        self.ip
    }

    /// Returns the request origin, if known.
    #[must_use]
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    /// Returns the request user agent, if known.
    #[must_use]
    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }
}
