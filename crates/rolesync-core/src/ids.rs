//! Strongly Typed Identifiers
//!
//! Platform objects (groups, roles, members, channels) are addressed by
//! opaque numeric strings. Wrapping each kind in its own newtype keeps a role
//! id from being passed where a group id is expected.
//!
//! # Example
//!
//! ```
//! use rolesync_core::{GroupId, RoleId};
//!
//! let group = GroupId::new("81384788765712384");
//! let role = RoleId::new("41771983423143936");
//!
//! fn requires_group(id: &GroupId) -> String {
//!     id.to_string()
//! }
//!
//! assert_eq!(requires_group(&group), "81384788765712384");
//! // requires_group(&role); // This would not compile!
//! # let _ = role;
//! ```

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use uuid::Uuid;

/// Error type for ID parsing failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// The type of ID that failed to parse
    pub id_type: &'static str,
    /// What was wrong with the input
    pub message: String,
}

impl Display for ParseIdError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to parse {}: {}", self.id_type, self.message)
    }
}

impl std::error::Error for ParseIdError {}

/// Macro to define a platform object identifier.
///
/// Platform ids are decimal strings. Parsing through [`FromStr`] validates
/// that shape; [`new`](GroupId::new) accepts any string for already-trusted
/// input such as API responses.
macro_rules! define_platform_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a raw identifier without validation.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Err(ParseIdError {
                        id_type: stringify!($name),
                        message: "identifier is empty".to_string(),
                    });
                }
                if !trimmed.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(ParseIdError {
                        id_type: stringify!($name),
                        message: format!("'{trimmed}' is not a numeric identifier"),
                    });
                }
                Ok(Self(trimmed.to_string()))
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_platform_id!(
    /// Identifier of a managed group (a community/server on the platform).
    GroupId
);

define_platform_id!(
    /// Identifier of a role within a group.
    RoleId
);

define_platform_id!(
    /// Identifier of a group member (the member's user id).
    MemberId
);

define_platform_id!(
    /// Identifier of a channel that can receive audit messages.
    ChannelId
);

/// Correlation id attached to every log line of one reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PassId(Uuid);

impl PassId {
    /// Creates a new random pass id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns a reference to the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PassId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for PassId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_parse_numeric_id() {
        let id: GroupId = "1234567890".parse().unwrap();
        assert_eq!(id.as_str(), "1234567890");
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let id: RoleId = "  42 ".parse().unwrap();
        assert_eq!(id, RoleId::new("42"));
    }

    #[test]
    fn test_parse_rejects_empty() {
        let err = "".parse::<MemberId>().unwrap_err();
        assert_eq!(err.id_type, "MemberId");
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn test_parse_rejects_non_numeric() {
        let err = "abc".parse::<ChannelId>().unwrap_err();
        assert_eq!(err.id_type, "ChannelId");
    }

    #[test]
    fn test_serde_transparent() {
        let id = MemberId::new("99");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"99\"");
        let back: MemberId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_ids_hash_by_value() {
        let mut set = HashSet::new();
        set.insert(RoleId::new("1"));
        set.insert(RoleId::new("1"));
        set.insert(RoleId::new("2"));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_pass_ids_are_unique() {
        assert_ne!(PassId::new(), PassId::new());
    }
}
