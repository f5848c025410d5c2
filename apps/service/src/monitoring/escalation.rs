//! Failure escalation state machine.
//!
//! Everything here is pure: a job record plus an event in, a [`JobUpdate`]
//! plus the alert to attempt out. The engine owns the side effects (sending,
//! persisting, rescheduling).

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use super::interval::Cadence;
use super::types::ProbeOutcome;
use crate::database::{EmailKind, FailureState, Job, JobStatus, JobUpdate};
use crate::error::ServiceError;
use crate::notifications::throttle::can_send;

/// Consecutive failures in rapid check that trigger a pause
pub const FAILURE_THRESHOLD: u32 = 3;

/// Pause rounds tolerated before a job is stopped for good
pub const MAX_FAILURE_CYCLES: u32 = 5;

pub const PAUSE_DURATION: Duration = Duration::from_secs(5 * 60);

pub const RAPID_CHECK_CADENCE: Cadence = Cadence::FifteenSeconds;

/// Alert the engine should attempt after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alert {
    None,
    /// Target answers again after an escalation or a failure email
    Recovery { downtime: String },
    /// Threshold reached and the throttle allows an email
    Failure,
    /// Threshold reached but no email may go out
    FailureSuppressed(&'static str),
    /// Maximum cycles exceeded, job stopped
    PermanentPause,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub update: JobUpdate,
    pub alert: Alert,
}

fn pause_duration() -> TimeDelta {
    TimeDelta::seconds(PAUSE_DURATION.as_secs() as i64)
}

/// Human readable time since `started_at`, `Unknown` when not tracked
pub fn format_downtime(started_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(started_at) = started_at else {
        return "Unknown".to_string();
    };

    let total_seconds = (now - started_at).num_seconds().max(0);
    let minutes = total_seconds / 60;
    let seconds = total_seconds % 60;

    let plural = |n: i64, unit: &str| if n == 1 { format!("{n} {unit}") } else { format!("{n} {unit}s") };

    if minutes > 0 {
        format!("{} {}", plural(minutes, "minute"), plural(seconds, "second"))
    } else {
        plural(seconds, "second")
    }
}

/// Transition for one probe outcome.
///
/// Returns `None` when the job no longer accepts probes (stopped, paused or
/// permanently paused); such an outcome is stale and must be discarded.
pub fn on_probe(
    job: &Job,
    outcome: &ProbeOutcome,
    now: DateTime<Utc>,
    fallback_rate_limit: u32,
) -> Option<Transition> {
    if !job.accepts_probes() {
        return None;
    }

    let mut update = JobUpdate::probe(outcome);

    let alert = if outcome.succeeded {
        on_success(job, now, &mut update)
    } else {
        on_failure(job, now, fallback_rate_limit, &mut update)
    };

    Some(Transition { update, alert })
}

fn on_success(job: &Job, now: DateTime<Utc>, update: &mut JobUpdate) -> Alert {
    update.failure_count = Some(0);
    update.failure_started_at = Some(None);

    let escalated = job.failure_state == FailureState::RapidCheck;
    let after_failure_email = job.last_email_type == Some(EmailKind::Failure);

    if escalated {
        update.failure_state = Some(FailureState::Normal);
        update.interval = Some(job.original_interval.unwrap_or(job.interval));
        update.original_interval = Some(None);
    }

    if !escalated && !after_failure_email {
        return Alert::None;
    }

    // True recovery. The stamp is cleared up front and only set again if the
    // recovery email is delivered, so recovery is attempted at most once.
    update.failure_cycles = Some(0);
    update.clear_email_stamp();

    Alert::Recovery { downtime: format_downtime(job.failure_started_at, now) }
}

fn on_failure(
    job: &Job,
    now: DateTime<Utc>,
    fallback_rate_limit: u32,
    update: &mut JobUpdate,
) -> Alert {
    let failure_count = job.failure_count.saturating_add(1);
    update.failure_count = Some(failure_count);

    if job.failure_state == FailureState::Normal {
        update.failure_state = Some(FailureState::RapidCheck);
        update.original_interval = Some(Some(job.interval));
        update.interval = Some(RAPID_CHECK_CADENCE);
        update.failure_started_at = Some(Some(now));
        return Alert::None;
    }

    if failure_count < FAILURE_THRESHOLD {
        return Alert::None;
    }

    let original = job.original_interval.unwrap_or(job.interval);

    if job.failure_cycles >= MAX_FAILURE_CYCLES {
        update.failure_state = Some(FailureState::PermanentlyPaused);
        update.status = Some(JobStatus::Stopped);
        update.permanently_paused = Some(true);
        update.interval = Some(original);
        update.original_interval = Some(None);
        update.pause_until = Some(None);
        return Alert::PermanentPause;
    }

    update.failure_state = Some(FailureState::Paused);
    update.pause_until = Some(Some(now + pause_duration()));
    update.original_interval = Some(Some(original));

    if job.alert_email.is_none() {
        Alert::FailureSuppressed("no alert email configured")
    } else if !can_send(job.last_email_sent, job.effective_rate_limit(fallback_rate_limit), now) {
        Alert::FailureSuppressed("rate limit active")
    } else {
        Alert::Failure
    }
}

/// Automatic resume once a pause deadline has passed.
///
/// `None` when the job is not paused.
pub fn on_resume(job: &Job) -> Option<JobUpdate> {
    if job.failure_state != FailureState::Paused {
        return None;
    }

    Some(JobUpdate {
        failure_cycles: Some(job.failure_cycles.saturating_add(1)),
        failure_count: Some(0),
        failure_state: Some(FailureState::Normal),
        interval: Some(job.original_interval.unwrap_or(job.interval)),
        original_interval: Some(None),
        pause_until: Some(None),
        ..Default::default()
    })
}

/// Operator reset of a permanently paused job
pub fn manual_reset(job: &Job) -> Result<JobUpdate, ServiceError> {
    if job.failure_state != FailureState::PermanentlyPaused && !job.permanently_paused {
        return Err(ServiceError::NotPermanentlyPaused(job.id));
    }

    Ok(JobUpdate {
        status: Some(JobStatus::Active),
        failure_state: Some(FailureState::Normal),
        failure_count: Some(0),
        failure_cycles: Some(0),
        permanently_paused: Some(false),
        pause_until: Some(None),
        failure_started_at: Some(None),
        interval: Some(job.original_interval.unwrap_or(job.interval)),
        original_interval: Some(None),
        ..Default::default()
    })
}
