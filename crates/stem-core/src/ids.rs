//! Branded ID newtypes for type safety.
//!
//! Users, workers and connections are all identified by opaque strings. Each
//! gets its own newtype so a worker id can never be passed where a connection
//! id is expected. Ranks are small integers and use a plain alias.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Rank of one process within a distributed worker.
pub type RankId = u32;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create from an existing string value.
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Authenticated owner of connections and workers. Supplied by the
    /// identity provider; all registry state is partitioned by it.
    UserId
}

branded_id! {
    /// Worker process identifier, chosen by the worker itself. Unique only
    /// within one user's scope.
    WorkerId
}

branded_id! {
    /// Transport-assigned identifier of one live WebSocket connection.
    ConnectionId
}

impl ConnectionId {
    /// Allocate a fresh connection id (`conn_` + UUID v7).
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }
}
