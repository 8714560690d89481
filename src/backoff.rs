//! Per-fund exponential backoff for failed snapshot fetches.

use chrono::{Duration, NaiveDateTime};

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::seconds(10),
            max: Duration::seconds(300),
        }
    }
}

impl BackoffPolicy {
    /// Delay after `failure_count` consecutive failures: `min(base * 2^(count-1), max)`.
    pub fn delay(&self, failure_count: u32) -> Duration {
        if failure_count == 0 {
            return Duration::zero();
        }
        let exponent = (failure_count - 1).min(30);
        let factor = 1_i32 << exponent;
        self.base
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffState {
    pub failure_count: u32,
    pub next_retry_at: NaiveDateTime,
}

impl BackoffState {
    /// Records one more failure at `now`, starting a new state when there was none.
    pub fn register_failure(
        previous: Option<BackoffState>,
        policy: &BackoffPolicy,
        now: NaiveDateTime,
    ) -> BackoffState {
        let failure_count = previous.map_or(0, |s| s.failure_count).saturating_add(1);
        BackoffState {
            failure_count,
            next_retry_at: now + policy.delay(failure_count),
        }
    }

    pub fn is_active(&self, now: NaiveDateTime) -> bool {
        now < self.next_retry_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_delay_sequence_caps_at_max() {
        let policy = BackoffPolicy::default();
        let delays: Vec<i64> = (1..=8).map(|n| policy.delay(n).num_seconds()).collect();
        assert_eq!(delays, vec![10, 20, 40, 80, 160, 300, 300, 300]);
        assert_eq!(policy.delay(200).num_seconds(), 300);
    }

    #[test]
    fn test_register_failure_escalates() {
        let policy = BackoffPolicy::default();
        let now = at(10, 0, 0);

        let first = BackoffState::register_failure(None, &policy, now);
        assert_eq!(first.failure_count, 1);
        assert_eq!(first.next_retry_at, at(10, 0, 10));

        let second = BackoffState::register_failure(Some(first), &policy, now);
        assert_eq!(second.failure_count, 2);
        assert_eq!(second.next_retry_at, at(10, 0, 20));
    }

    #[test]
    fn test_is_active_window() {
        let state = BackoffState::register_failure(None, &BackoffPolicy::default(), at(10, 0, 0));
        assert!(state.is_active(at(10, 0, 9)));
        assert!(!state.is_active(at(10, 0, 10)));
    }
}
