use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result of a single probe against a job's target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    /// When the probe was started
    pub checked_at: DateTime<Utc>,

    /// Whether the target counted as reachable
    pub succeeded: bool,

    /// Wall time spent on the request, in milliseconds
    pub duration_ms: u64,

    /// Short human string, `Success: <status>` or `Error: <message>`
    pub result_text: String,
}

impl ProbeOutcome {
    /// The target answered with a non-5xx status
    pub fn success(checked_at: DateTime<Utc>, duration_ms: u64, status_code: u16) -> Self {
        Self {
            checked_at,
            succeeded: true,
            duration_ms,
            result_text: format!("Success: {status_code}"),
        }
    }

    /// The target timed out, refused the connection or answered with a 5xx
    pub fn failure(checked_at: DateTime<Utc>, duration_ms: u64, message: impl fmt::Display) -> Self {
        Self {
            checked_at,
            succeeded: false,
            duration_ms,
            result_text: format!("Error: {message}"),
        }
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}ms)", self.result_text, self.duration_ms)
    }
}
