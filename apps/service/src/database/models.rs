use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::monitoring::interval::Cadence;
use crate::monitoring::types::ProbeOutcome;

/// Row id of a job
pub type JobId = i64;

/// Whether the scheduler should run a job at all
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Active,
    Stopped,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Active => "active",
            JobStatus::Stopped => "stopped",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            JobStatus::Active => JobStatus::Stopped,
            JobStatus::Stopped => JobStatus::Active,
        }
    }
}

/// Escalation state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureState {
    Normal,
    RapidCheck,
    Paused,
    PermanentlyPaused,
}

impl FailureState {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureState::Normal => "normal",
            FailureState::RapidCheck => "rapid_check",
            FailureState::Paused => "paused",
            FailureState::PermanentlyPaused => "permanently_paused",
        }
    }
}

/// Kind of alert email
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailKind {
    Failure,
    Recovery,
}

impl EmailKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EmailKind::Failure => "failure",
            EmailKind::Recovery => "recovery",
        }
    }
}

macro_rules! impl_text_enum {
    ($ty:ty, $($text:literal => $variant:expr),+ $(,)?) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($variant),)+
                    other => Err(format!("unknown {} value: {other}", stringify!($ty))),
                }
            }
        }
    };
}

impl_text_enum!(JobStatus, "active" => JobStatus::Active, "stopped" => JobStatus::Stopped);
impl_text_enum!(
    FailureState,
    "normal" => FailureState::Normal,
    "rapid_check" => FailureState::RapidCheck,
    "paused" => FailureState::Paused,
    "permanently_paused" => FailureState::PermanentlyPaused,
);
impl_text_enum!(EmailKind, "failure" => EmailKind::Failure, "recovery" => EmailKind::Recovery);

/// A monitored target and its escalation bookkeeping.
///
/// Optional timestamps are `None` when absent. `pause_until` being `None` means
/// "not paused", never "paused without a deadline".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub url: String,
    pub alert_email: Option<String>,

    /// Current cadence (15 seconds while escalated)
    pub interval: Cadence,
    /// Cadence to restore once escalation ends; only set while escalated
    pub original_interval: Option<Cadence>,
    pub status: JobStatus,

    pub failure_state: FailureState,
    /// Consecutive failures since the last success
    pub failure_count: u32,
    /// Completed rapid-check/pause rounds since the last true recovery
    pub failure_cycles: u32,
    pub failure_started_at: Option<DateTime<Utc>>,
    pub pause_until: Option<DateTime<Utc>>,
    pub permanently_paused: bool,

    /// Minimum minutes between two delivered alerts; 0 means "use the fallback"
    pub email_rate_limit: u32,
    /// Last delivered alert of any kind, the throttle input
    pub last_email_sent: Option<DateTime<Utc>>,
    /// Most recent delivered alert, for display and recovery gating
    pub email_sent_at: Option<DateTime<Utc>>,
    pub last_email_type: Option<EmailKind>,

    pub last_run: Option<DateTime<Utc>>,
    pub last_duration: Option<u64>,
    pub last_result: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Rate limit to apply, substituting `fallback` for an unset limit
    pub fn effective_rate_limit(&self, fallback: u32) -> u32 {
        if self.email_rate_limit == 0 { fallback } else { self.email_rate_limit }
    }

    /// Whether a probe outcome may drive this job's state machine
    pub fn accepts_probes(&self) -> bool {
        self.status == JobStatus::Active
            && matches!(self.failure_state, FailureState::Normal | FailureState::RapidCheck)
    }

    /// Copy of this job with `update` applied
    pub fn with_update(&self, update: &JobUpdate) -> Self {
        let mut job = self.clone();
        update.apply_to(&mut job);
        job
    }
}

/// Request to create a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub url: String,
    pub interval: Cadence,
    pub alert_email: Option<String>,
    pub email_rate_limit: u32,
}

/// Partial update of a job row.
///
/// `None` leaves a column untouched. For nullable columns the inner option
/// distinguishes setting a value (`Some(Some(v))`) from clearing it
/// (`Some(None)`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub alert_email: Option<Option<String>>,
    pub interval: Option<Cadence>,
    pub original_interval: Option<Option<Cadence>>,
    pub status: Option<JobStatus>,
    pub failure_state: Option<FailureState>,
    pub failure_count: Option<u32>,
    pub failure_cycles: Option<u32>,
    pub failure_started_at: Option<Option<DateTime<Utc>>>,
    pub pause_until: Option<Option<DateTime<Utc>>>,
    pub permanently_paused: Option<bool>,
    pub last_email_sent: Option<Option<DateTime<Utc>>>,
    pub email_sent_at: Option<Option<DateTime<Utc>>>,
    pub last_email_type: Option<Option<EmailKind>>,
    pub last_run: Option<DateTime<Utc>>,
    pub last_duration: Option<u64>,
    pub last_result: Option<String>,
}

impl JobUpdate {
    /// Update carrying only the raw probe snapshot
    pub fn probe(outcome: &ProbeOutcome) -> Self {
        Self {
            last_run: Some(outcome.checked_at),
            last_duration: Some(outcome.duration_ms),
            last_result: Some(outcome.result_text.clone()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Stamp a delivered alert
    pub fn record_email(&mut self, kind: EmailKind, at: DateTime<Utc>) {
        self.last_email_sent = Some(Some(at));
        self.email_sent_at = Some(Some(at));
        self.last_email_type = Some(Some(kind));
    }

    pub fn clear_email_stamp(&mut self) {
        self.email_sent_at = Some(None);
        self.last_email_type = Some(None);
    }

    pub fn apply_to(&self, job: &mut Job) {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(value) = value {
                *target = value.clone();
            }
        }

        set(&mut job.alert_email, &self.alert_email);
        set(&mut job.interval, &self.interval);
        set(&mut job.original_interval, &self.original_interval);
        set(&mut job.status, &self.status);
        set(&mut job.failure_state, &self.failure_state);
        set(&mut job.failure_count, &self.failure_count);
        set(&mut job.failure_cycles, &self.failure_cycles);
        set(&mut job.failure_started_at, &self.failure_started_at);
        set(&mut job.pause_until, &self.pause_until);
        set(&mut job.permanently_paused, &self.permanently_paused);
        set(&mut job.last_email_sent, &self.last_email_sent);
        set(&mut job.email_sent_at, &self.email_sent_at);
        set(&mut job.last_email_type, &self.last_email_type);

        if let Some(last_run) = self.last_run {
            job.last_run = Some(last_run);
        }
        if let Some(last_duration) = self.last_duration {
            job.last_duration = Some(last_duration);
        }
        if let Some(last_result) = &self.last_result {
            job.last_result = Some(last_result.clone());
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::{base_time, job};
    use super::*;

    #[test]
    fn test_enum_text_round_trip() {
        for state in [
            FailureState::Normal,
            FailureState::RapidCheck,
            FailureState::Paused,
            FailureState::PermanentlyPaused,
        ] {
            assert_eq!(state.as_str().parse::<FailureState>().unwrap(), state);
        }
        assert_eq!("stopped".parse::<JobStatus>().unwrap(), JobStatus::Stopped);
        assert!("sleeping".parse::<JobStatus>().is_err());
        assert_eq!("recovery".parse::<EmailKind>().unwrap(), EmailKind::Recovery);
    }

    #[test]
    fn test_update_distinguishes_keep_and_clear() {
        let mut job = job();
        job.pause_until = Some(base_time());
        job.failure_started_at = Some(base_time());

        let update = JobUpdate { pause_until: Some(None), ..Default::default() };
        update.apply_to(&mut job);

        assert_eq!(job.pause_until, None);
        assert_eq!(job.failure_started_at, Some(base_time()));
    }

    #[test]
    fn test_record_email_stamps_all_fields() {
        let mut update = JobUpdate::default();
        update.record_email(EmailKind::Failure, base_time());

        let job = job().with_update(&update);
        assert_eq!(job.last_email_sent, Some(base_time()));
        assert_eq!(job.email_sent_at, Some(base_time()));
        assert_eq!(job.last_email_type, Some(EmailKind::Failure));
    }

    #[test]
    fn test_effective_rate_limit_fallback() {
        let mut job = job();
        assert_eq!(job.effective_rate_limit(60), 30);
        job.email_rate_limit = 0;
        assert_eq!(job.effective_rate_limit(60), 60);
    }

    #[test]
    fn test_accepts_probes() {
        let mut job = job();
        assert!(job.accepts_probes());
        job.failure_state = FailureState::Paused;
        assert!(!job.accepts_probes());
        job.failure_state = FailureState::RapidCheck;
        job.status = JobStatus::Stopped;
        assert!(!job.accepts_probes());
    }
}
