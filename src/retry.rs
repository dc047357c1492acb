//! Reconnection backoff policy.
//!
//! Delays grow exponentially from `first_backoff` to `max_backoff`, with a
//! symmetric random jitter so a fleet of clients disconnected together does
//! not reconnect together.

use crate::error::GatewayError;
use rand::Rng;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Jittered exponential backoff configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub first_backoff: Duration,

    /// Upper bound on the un-jittered delay.
    pub max_backoff: Duration,

    /// Jitter as a fraction of the delay, in `[0, 1]`. A delay `d` becomes
    /// a uniform sample from `[d * (1 - j), d * (1 + j)]`.
    pub jitter_ratio: f64,

    /// Give up after this many consecutive failed attempts; `None` retries
    /// forever.
    pub max_retries: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            first_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            jitter_ratio: 0.25,
            max_retries: Some(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt number `attempts` (1-indexed).
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1);
        let base_ms = (self.first_backoff.as_millis() as u64)
            .saturating_mul(2u64.saturating_pow(exponent))
            .min(self.max_backoff.as_millis() as u64);

        let jittered = if self.jitter_ratio > 0.0 {
            let jitter: f64 = rand::rng().random_range(-self.jitter_ratio..=self.jitter_ratio);
            (base_ms as f64 * (1.0 + jitter)).max(0.0) as u64
        } else {
            base_ms
        };

        Duration::from_millis(jittered)
    }

    /// Whether the supervisor should schedule another attempt after `err`.
    pub fn should_retry(&self, err: &GatewayError) -> bool {
        !err.is_fatal()
    }

    /// Whether `attempts` consecutive failures exceed the budget.
    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_retries.is_some_and(|max| attempts > max)
    }
}

/// Per-client retry accounting.
///
/// Attempts are atomic so the payload dispatcher can reset the streak when
/// Ready/Resumed lands while the supervisor owns the counter.
#[derive(Debug, Default)]
pub struct RetryContext {
    attempts: AtomicU32,
    reset_count: AtomicU32,
}

impl RetryContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record another failed attempt; returns the new attempt number.
    pub fn next(&self) -> u32 {
        self.attempts.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Consecutive failed attempts in the current streak.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// End the streak after a successful Ready/Resumed.
    pub fn reset(&self) {
        self.attempts.store(0, Ordering::SeqCst);
        self.reset_count.fetch_add(1, Ordering::SeqCst);
    }

    /// How many times the streak has been reset.
    pub fn reset_count(&self) -> u32 {
        self.reset_count.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> RetryPolicy {
        RetryPolicy {
            jitter_ratio: 0.0,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn test_exponential_growth_and_cap() {
        let policy = no_jitter();
        assert_eq!(policy.next_delay(1), Duration::from_millis(1000));
        assert_eq!(policy.next_delay(2), Duration::from_millis(2000));
        assert_eq!(policy.next_delay(3), Duration::from_millis(4000));
        assert_eq!(policy.next_delay(4), Duration::from_millis(8000));
        assert_eq!(policy.next_delay(20), Duration::from_millis(60000));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy = RetryPolicy {
            first_backoff: Duration::from_millis(1000),
            jitter_ratio: 0.25,
            ..RetryPolicy::default()
        };

        let low = Duration::from_millis(750);
        let high = Duration::from_millis(1250);
        for _ in 0..1000 {
            let delay = policy.next_delay(1);
            assert!(
                delay >= low && delay <= high,
                "delay {delay:?} outside [{low:?}, {high:?}]"
            );
        }
    }

    #[test]
    fn test_exhaustion() {
        let policy = RetryPolicy {
            max_retries: Some(3),
            ..RetryPolicy::default()
        };
        assert!(!policy.exhausted(3));
        assert!(policy.exhausted(4));

        let unbounded = RetryPolicy {
            max_retries: None,
            ..RetryPolicy::default()
        };
        assert!(!unbounded.exhausted(u32::MAX));
    }

    #[test]
    fn test_fatal_errors_not_retried() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(&GatewayError::ZombieConnection));
        assert!(policy.should_retry(&GatewayError::Transport("reset".into())));
        assert!(!policy.should_retry(&GatewayError::AuthenticationFailed("bad token".into())));
    }

    #[test]
    fn test_context_accounting() {
        let ctx = RetryContext::new();
        assert_eq!(ctx.attempts(), 0);
        assert_eq!(ctx.next(), 1);
        assert_eq!(ctx.next(), 2);
        assert_eq!(ctx.attempts(), 2);

        ctx.reset();
        assert_eq!(ctx.attempts(), 0);
        assert_eq!(ctx.reset_count(), 1);
    }
}
