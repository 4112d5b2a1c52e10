use chrono::{DateTime, Utc};
use std::time::Duration;

/// Time left until `due_at`, clamped to zero for due times in the past.
pub fn compute_delay(now: DateTime<Utc>, due_at: DateTime<Utc>) -> Duration {
    (due_at - now).to_std().unwrap_or(Duration::ZERO)
}

/// Absolute due time for a job submitted `delay` from `now`.
pub fn due_after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_future_due_time() {
        let now = Utc::now();
        let due = now + chrono::Duration::milliseconds(1500);
        assert_eq!(compute_delay(now, due), Duration::from_millis(1500));
    }

    #[test]
    fn test_due_now_is_zero() {
        let now = Utc::now();
        assert_eq!(compute_delay(now, now), Duration::ZERO);
    }

    #[test]
    fn test_past_due_time_clamps_to_zero() {
        let now = Utc::now();
        for past in [1, 1_000, 86_400_000] {
            let due = now - chrono::Duration::milliseconds(past);
            assert_eq!(compute_delay(now, due), Duration::ZERO);
        }
    }

    #[test]
    fn test_due_after_inverts_compute_delay() {
        let now = Utc::now();
        let due = due_after(now, Duration::from_secs(90));
        assert_eq!(compute_delay(now, due), Duration::from_secs(90));
    }
}
