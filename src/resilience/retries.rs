//! Retry policy for ledger broadcasts.
//!
//! # Design Decisions
//! - Only network errors are retried; rejections are final
//! - Exponential backoff capped at `max_delay`, plus up to 10% jitter
//! - `max_attempts` counts the first attempt, so 1 means "no retries"

use rand::Rng;
use std::time::Duration;

use crate::config::schema::RetryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Delay before retry number `retry` (1 = first retry). Zero for `retry == 0`.
    pub fn backoff(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;
        let delay_ms = base_ms
            .saturating_mul(2u64.saturating_pow(retry - 1))
            .min(max_ms);

        let jitter_range = delay_ms / 10;
        let jitter = if jitter_range > 0 {
            rand::thread_rng().gen_range(0..jitter_range)
        } else {
            0
        };

        Duration::from_millis(delay_ms + jitter)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_millis(1000));

        assert_eq!(policy.backoff(0), Duration::ZERO);

        let first = policy.backoff(1).as_millis();
        assert!((100..110).contains(&first));

        let second = policy.backoff(2).as_millis();
        assert!((200..220).contains(&second));

        let capped = policy.backoff(10).as_millis();
        assert!((1000..1100).contains(&capped));
    }

    #[test]
    fn test_attempts_never_zero() {
        let policy = RetryPolicy::new(0, Duration::from_millis(1), Duration::from_millis(1));
        assert_eq!(policy.max_attempts, 1);
    }
}
