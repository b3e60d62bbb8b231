//! Identifier types used throughout the TillPoint core.
//!
//! Uses UUID v7 for time-ordered, globally unique identifiers. All of the
//! identifiers share one shape, so they are stamped out by a local macro;
//! each is a distinct type so a conflict id can never be passed where a
//! queue-item id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new identifier with the current timestamp.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Creates an identifier from an existing UUID.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }

            /// Parses an identifier from a string.
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                Ok(Self(Uuid::parse_str(s)?))
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

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

uuid_id! {
    /// Identity of a domain record (an order, a payment, an inventory row, ...)
    /// within its table. Together with the table name it is the global key the
    /// remote store is addressed by.
    RecordId
}

uuid_id! {
    /// Identity of the till device this process runs on. Stamped into sync
    /// payloads so the backend can attribute writes; excluded from conflict
    /// comparison as a volatile field.
    DeviceId
}

uuid_id! {
    /// Identity of one pending change awaiting propagation.
    SyncRecordId
}

uuid_id! {
    /// Identity of one unit of work held by a sync queue.
    QueueItemId
}

uuid_id! {
    /// Identity of one detected local/remote divergence.
    ConflictId
}
