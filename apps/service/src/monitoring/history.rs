use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::database::JobId;
use crate::monitoring::types::ProbeOutcome;

/// Failures kept per job for the alert email
pub const HISTORY_CAPACITY: usize = 5;

/// One failed probe, as listed in a failure email
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub time: DateTime<Utc>,
    pub result: String,
    pub duration_ms: u64,
}

impl From<&ProbeOutcome> for FailureRecord {
    fn from(outcome: &ProbeOutcome) -> Self {
        Self {
            time: outcome.checked_at,
            result: outcome.result_text.clone(),
            duration_ms: outcome.duration_ms,
        }
    }
}

/// In-memory ring of recent failures per job.
///
/// Not persisted; a restart starts every job with an empty history.
#[derive(Debug, Default)]
pub struct FailureHistory {
    entries: Mutex<HashMap<JobId, VecDeque<FailureRecord>>>,
}

impl FailureHistory {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<JobId, VecDeque<FailureRecord>>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a failure, evicting the oldest past [`HISTORY_CAPACITY`]
    pub fn record(&self, id: JobId, record: FailureRecord) {
        let mut entries = self.entries();
        let ring = entries.entry(id).or_default();
        ring.push_back(record);
        while ring.len() > HISTORY_CAPACITY {
            ring.pop_front();
        }
    }

    /// Oldest first
    pub fn snapshot(&self, id: JobId) -> Vec<FailureRecord> {
        self.entries().get(&id).map(|ring| ring.iter().cloned().collect()).unwrap_or_default()
    }

    pub fn clear(&self, id: JobId) {
        self.entries().remove(&id);
    }

    pub fn len(&self, id: JobId) -> usize {
        self.entries().get(&id).map_or(0, VecDeque::len)
    }
}
