//! Typed ID wrappers for run, trace and session identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Strings underneath. The wrappers only exist so a trace id can never be
/// passed where a run id is expected.
macro_rules! typed_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create a new typed ID from anything that converts to String.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Create a fresh random ID (UUID v4).
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            /// Borrow the inner string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

typed_id!(RunId, "Identifier for one execution of the turn loop.");
typed_id!(TraceId, "Identifier correlating a run with its telemetry.");
typed_id!(
    SessionId,
    "Identifier of an external human-in-the-loop session (e.g. an OAuth flow)."
);
