//! Bounded retry policy with capped exponential backoff.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Retry policy for retryable API failures.
///
/// Retries are bounded by both an attempt count and a wall-clock budget;
/// whichever limit trips first stops retrying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum submission attempts (including the first).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff base delay for the first retry.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Cap on any single backoff delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Wall-clock budget for the whole submission, retries included.
    #[serde(default = "default_time_budget_ms")]
    pub time_budget_ms: u64,
    /// Upper bound on random jitter added to each delay.
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    8_000
}
fn default_time_budget_ms() -> u64 {
    12_000
}
fn default_jitter_ms() -> u64 {
    250
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            time_budget_ms: default_time_budget_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt is allowed after `attempts` tries and
    /// `elapsed` wall-clock time.
    pub fn allows_retry(&self, attempts: u32, elapsed: Duration) -> bool {
        attempts < self.max_attempts && elapsed < Duration::from_millis(self.time_budget_ms)
    }

    /// Deterministic backoff delay before retry number `retry` (1-based):
    /// base doubling each time, capped. Jitter is added separately so this
    /// stays testable.
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16);
        let ms = self
            .base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    /// Backoff delay plus uniform random jitter, to avoid thundering herds.
    pub fn jittered_delay(&self, retry: u32) -> Duration {
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        };
        self.backoff_delay(retry) + Duration::from_millis(jitter)
    }

    pub fn time_budget(&self) -> Duration {
        Duration::from_millis(self.time_budget_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(1_000));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(2_000));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(4_000));
        assert_eq!(policy.backoff_delay(4), Duration::from_millis(8_000));
        // Capped from here on
        assert_eq!(policy.backoff_delay(10), Duration::from_millis(8_000));
    }

    #[test]
    fn backoff_sequence_is_non_decreasing() {
        let policy = RetryPolicy::default();
        let mut last = Duration::ZERO;
        for retry in 1..12 {
            let d = policy.backoff_delay(retry);
            assert!(d >= last);
            last = d;
        }
    }

    #[test]
    fn jitter_stays_within_bound() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let d = policy.jittered_delay(1);
            assert!(d >= Duration::from_millis(1_000));
            assert!(d <= Duration::from_millis(1_250));
        }
    }

    #[test]
    fn attempt_cap_stops_retries() {
        let policy = RetryPolicy::default();
        assert!(policy.allows_retry(1, Duration::from_secs(1)));
        assert!(policy.allows_retry(2, Duration::from_secs(1)));
        assert!(!policy.allows_retry(3, Duration::from_secs(1)));
    }

    #[test]
    fn time_budget_stops_retries() {
        let policy = RetryPolicy::default();
        assert!(!policy.allows_retry(1, Duration::from_secs(13)));
    }

    #[test]
    fn zero_jitter_is_exact() {
        let policy = RetryPolicy {
            jitter_ms: 0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.jittered_delay(2), Duration::from_millis(2_000));
    }
}
