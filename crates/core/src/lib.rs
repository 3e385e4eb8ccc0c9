//! Shared primitives for all Rust crates in Keyward.

#![forbid(unsafe_code)]

/// Request accountability primitives shared across services.
pub mod accountability;

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use accountability::Accountability;

/// Result type used across Keyward crates.
pub type AppResult<T> = Result<T, AppError>;

macro_rules! uuid_identifier {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an identifier from an existing UUID value.
            #[must_use]
            pub fn from_uuid(value: Uuid) -> Self {
                Self(value)
            }

            /// Returns the underlying UUID value.
            #[must_use]
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Display for $name {
            fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
                write!(formatter, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = AppError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(value).map(Self).map_err(|error| {
                    AppError::Validation(format!("invalid {} '{value}': {error}", $label))
                })
            }
        }
    };
}

uuid_identifier!(
    /// Policy identifier. Policies bundle permission rules.
    PolicyId,
    "policy id"
);
uuid_identifier!(
    /// Role identifier. Roles form a hierarchy resolved into an ancestor chain.
    RoleId,
    "role id"
);
uuid_identifier!(
    /// User identifier.
    UserId,
    "user id"
);

/// Common application error categories.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppError {
    /// Invalid input or violated invariant.
    #[error("validation error: {0}")]
    Validation(String),

    /// A requested field is not covered by any applicable permission.
    #[error("forbidden: field '{field}' in collection '{collection}' is not accessible")]
    FieldDenied {
        /// Collection the field belongs to.
        collection: String,
        /// Denied field name.
        field: String,
    },

    /// No applicable permission rule allows rows of the collection.
    #[error("forbidden: no rows of collection '{collection}' are accessible")]
    RowDenied {
        /// Denied collection.
        collection: String,
    },

    /// Caller is blocked by an access gate.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Schema or integrity problem, such as a collection without primary key.
    #[error("schema error: {0}")]
    Schema(String),

    /// Transient failure raised by an external store.
    #[error("store error: {0}")]
    Store(String),

    /// Internal unexpected error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns whether the error is one of the forbidden categories.
    #[must_use]
    pub fn is_forbidden(&self) -> bool {
        matches!(
            self,
            Self::FieldDenied { .. } | Self::RowDenied { .. } | Self::Forbidden(_)
        )
    }
}
