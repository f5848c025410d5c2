use chrono::{DateTime, Utc};

/// Whether enough time has passed since `last_sent` to deliver another alert.
///
/// Elapsed time is compared in fractional minutes, so 29m59s against a
/// 30 minute limit is still throttled.
pub fn can_send(last_sent: Option<DateTime<Utc>>, rate_limit_minutes: u32, now: DateTime<Utc>) -> bool {
    match last_sent {
        None => true,
        Some(last_sent) => {
            let elapsed_minutes = (now - last_sent).num_milliseconds() as f64 / 60_000.0;
            elapsed_minutes >= f64::from(rate_limit_minutes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn test_never_sent() {
        assert!(can_send(None, 30, Utc::now()));
        assert!(can_send(None, 0, Utc::now()));
    }

    #[test]
    fn test_within_limit() {
        let now = Utc::now();
        assert!(!can_send(Some(now - TimeDelta::minutes(29)), 30, now));
        assert!(!can_send(Some(now - TimeDelta::seconds(30 * 60 - 1)), 30, now));
    }

    #[test]
    fn test_past_limit() {
        let now = Utc::now();
        assert!(can_send(Some(now - TimeDelta::minutes(31)), 30, now));
        assert!(can_send(Some(now - TimeDelta::minutes(30)), 30, now));
    }

    #[test]
    fn test_zero_limit_always_allows() {
        let now = Utc::now();
        assert!(can_send(Some(now), 0, now));
    }
}
