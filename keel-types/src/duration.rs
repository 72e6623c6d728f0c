//! Millisecond durations for guardrail and service configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A timeout or window in whole milliseconds.
///
/// Config files and events carry it as a bare integer, so
/// `{"timeout": 30000}` deserializes directly into an
/// `AdvancedGuardrailConfig`.
///
/// ```
/// use keel_types::DurationMs;
///
/// let timeout: DurationMs = serde_json::from_str("2500").unwrap();
/// assert_eq!(timeout.to_std().as_secs_f64(), 2.5);
/// assert_eq!(timeout.to_string(), "2500ms");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DurationMs(u64);

impl DurationMs {
    /// Usable in `const` defaults such as minimum timeouts.
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    /// Milliseconds.
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// For `tokio::time` deadlines and TTLs.
    pub fn to_std(&self) -> Duration {
        Duration::from_millis(self.0)
    }
}

impl std::fmt::Display for DurationMs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}
