//! Strongly-typed identifiers for hearthd

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Declares an identifier assigned by an external system (config, identity
/// service) and carried around as an opaque string.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

/// Declares an identifier minted by hearthd itself.
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Parse the hyphenated form written by `Display`
            pub fn parse(s: &str) -> Option<Self> {
                Uuid::parse_str(s).ok().map(Self)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id!(
    /// A child in a family
    ChildId
);

string_id!(
    /// A family (the unit of guardian authority and event fan-out)
    FamilyId
);

string_id!(
    /// Any authenticated user: guardian, child, or service principal
    UserId
);

uuid_id!(
    /// A gaming session
    SessionId
);

uuid_id!(
    /// A pending-or-resolved purchase approval
    ApprovalId
);

uuid_id!(
    /// An auto-approved purchase recorded in the spend ledger
    PurchaseId
);

uuid_id!(
    /// A connected realtime transport client
    ConnectionId
);
