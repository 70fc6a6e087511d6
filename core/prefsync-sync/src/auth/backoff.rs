//! Exponential backoff with jitter for token requests.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Shape of the retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Delay after the first counted failure.
    pub initial_delay_ms: u64,
    /// Growth factor per further failure.
    pub multiplier: f64,
    /// Fraction of the delay randomly added or removed (0.2 = ±20%).
    pub jitter: f64,
    /// Upper bound for any delay, jitter included.
    pub max_delay_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 2_000,
            multiplier: 2.0,
            jitter: 0.2,
            max_delay_ms: 4 * 60 * 60 * 1000,
        }
    }
}

/// Exponential backoff calculator with jitter
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    failures: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            failures: 0,
        }
    }

    /// Counts a failure and returns how long to wait before the next try.
    pub fn next_delay(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let exponent = i32::try_from(self.failures - 1).unwrap_or(i32::MAX);
        let base = self.policy.initial_delay_ms as f64 * self.policy.multiplier.powi(exponent);

        let jitter = self.policy.jitter.clamp(0.0, 1.0);
        let factor = if jitter > 0.0 {
            rand::thread_rng().gen_range(1.0 - jitter..=1.0 + jitter)
        } else {
            1.0
        };

        let max = self.policy.max_delay_ms as f64;
        let delay = (base * factor).min(max).max(0.0);
        Duration::from_millis(delay as u64)
    }

    /// Forget all failures (e.g., after a successful request).
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failure_count(&self) -> u32 {
        self.failures
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(initial: u64, max: u64) -> BackoffPolicy {
        BackoffPolicy {
            initial_delay_ms: initial,
            max_delay_ms: max,
            ..Default::default()
        }
    }

    #[test]
    fn test_backoff_grows_within_jitter() {
        let mut backoff = Backoff::new(policy(100, 1_000_000));

        for base in [100u128, 200, 400, 800] {
            let d = backoff.next_delay().as_millis();
            assert!(d >= base * 8 / 10, "{d} below {base}-20%");
            assert!(d <= base * 12 / 10, "{d} above {base}+20%");
        }
        assert_eq!(backoff.failure_count(), 4);
    }

    #[test]
    fn test_backoff_caps_at_max() {
        let mut backoff = Backoff::new(policy(100, 500));

        for _ in 0..50 {
            assert!(backoff.next_delay().as_millis() <= 500);
        }
    }

    #[test]
    fn test_backoff_reset() {
        let mut backoff = Backoff::new(policy(100, 10_000));
        backoff.next_delay();
        backoff.next_delay();
        backoff.next_delay();

        backoff.reset();

        assert_eq!(backoff.failure_count(), 0);
        assert!(backoff.next_delay().as_millis() <= 120);
    }

    #[test]
    fn test_zero_jitter_is_exact() {
        let mut backoff = Backoff::new(BackoffPolicy {
            initial_delay_ms: 2_000,
            jitter: 0.0,
            ..Default::default()
        });
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(4));
        assert_eq!(backoff.next_delay(), Duration::from_secs(8));
    }

    #[test]
    fn test_default_cap_is_four_hours() {
        let mut backoff = Backoff::new(BackoffPolicy::default());
        for _ in 0..40 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), Duration::from_secs(4 * 3600));
    }
}
