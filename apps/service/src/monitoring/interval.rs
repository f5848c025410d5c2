//! Interval catalog: the fixed set of monitoring cadences a job can run at.
//!
//! Cadences are plain fixed periods. The scheduler drives ticks from its own
//! timers; [`Cadence::next_run_after`] only exists for the read-side projection
//! shown next to each job.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound for a single probe request.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// An occurrence closer than this to "now" is skipped by the projection.
const NEXT_RUN_MIN_LEAD_MS: i64 = 1_000;

/// Monitoring cadence of a job.
///
/// Serialized as its human label (`"1 minute"`, `"15 seconds"`, ...). Unknown
/// labels fall back to one minute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "&'static str")]
pub enum Cadence {
    /// Reserved for escalated rapid checking.
    FifteenSeconds,
    ThirtySeconds,
    #[default]
    OneMinute,
    FiveMinutes,
    ThirtyMinutes,
    OneHour,
}

impl Cadence {
    pub const ALL: [Cadence; 6] = [
        Cadence::FifteenSeconds,
        Cadence::ThirtySeconds,
        Cadence::OneMinute,
        Cadence::FiveMinutes,
        Cadence::ThirtyMinutes,
        Cadence::OneHour,
    ];

    /// Parse a cadence label, defaulting to one minute for anything unknown.
    pub fn from_label(label: &str) -> Self {
        match label.trim() {
            "15 seconds" => Cadence::FifteenSeconds,
            "30 seconds" => Cadence::ThirtySeconds,
            "1 minute" => Cadence::OneMinute,
            "5 minutes" => Cadence::FiveMinutes,
            "30 minutes" => Cadence::ThirtyMinutes,
            "1 hour" => Cadence::OneHour,
            _ => Cadence::OneMinute,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Cadence::FifteenSeconds => "15 seconds",
            Cadence::ThirtySeconds => "30 seconds",
            Cadence::OneMinute => "1 minute",
            Cadence::FiveMinutes => "5 minutes",
            Cadence::ThirtyMinutes => "30 minutes",
            Cadence::OneHour => "1 hour",
        }
    }

    /// Repeat period of this cadence.
    pub fn period(self) -> Duration {
        match self {
            Cadence::FifteenSeconds => Duration::from_secs(15),
            Cadence::ThirtySeconds => Duration::from_secs(30),
            Cadence::OneMinute => Duration::from_secs(60),
            Cadence::FiveMinutes => Duration::from_secs(5 * 60),
            Cadence::ThirtyMinutes => Duration::from_secs(30 * 60),
            Cadence::OneHour => Duration::from_secs(60 * 60),
        }
    }

    /// Next occurrence strictly after `now`, on the period grid anchored at the
    /// unix epoch. An occurrence due within one second of `now` is skipped in
    /// favour of the one after it.
    pub fn next_run_after(self, now: DateTime<Utc>) -> DateTime<Utc> {
        let period_ms = self.period().as_millis() as i64;
        let now_ms = now.timestamp_millis();

        let mut next_ms = (now_ms.div_euclid(period_ms) + 1) * period_ms;
        if next_ms - now_ms < NEXT_RUN_MIN_LEAD_MS {
            next_ms += period_ms;
        }

        DateTime::from_timestamp_millis(next_ms)
            .unwrap_or_else(|| now + TimeDelta::milliseconds(period_ms))
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl From<String> for Cadence {
    fn from(label: String) -> Self {
        Cadence::from_label(&label)
    }
}

impl From<&str> for Cadence {
    fn from(label: &str) -> Self {
        Cadence::from_label(label)
    }
}

impl From<Cadence> for &'static str {
    fn from(cadence: Cadence) -> Self {
        cadence.label()
    }
}
