//! Centralized retry policy shared by the bus publisher, the LLM router's
//! transient-network path, and the sandbox's infra-retry path.
//!
//! Replaces what would otherwise be ad-hoc retry loops scattered across
//! modules with a single value type each caller configures once.

use std::time::Duration;

/// An exponential (or linear, with `base_backoff == cap`) backoff policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Backoff duration before the first retry.
    pub base_backoff: Duration,
    /// Upper bound on any single backoff delay.
    pub cap: Duration,
}

impl RetryPolicy {
    /// Creates a policy with the given parameters.
    #[must_use]
    pub const fn new(max_attempts: u32, base_backoff: Duration, cap: Duration) -> Self {
        Self {
            max_attempts,
            base_backoff,
            cap,
        }
    }

    /// The message bus's transport retry policy: 50ms base, 5s cap, retried
    /// for up to 30s total before the publisher surfaces `BusUnavailable`.
    #[must_use]
    pub const fn bus_publish() -> Self {
        Self::new(u32::MAX, Duration::from_millis(50), Duration::from_secs(5))
    }

    /// The LLM router's transient-network retry policy: 50ms base doubling
    /// per attempt, capped at 5s, bounded by a per-key retry budget.
    #[must_use]
    pub const fn llm_transient_network() -> Self {
        Self::new(3, Duration::from_millis(50), Duration::from_secs(5))
    }

    /// The sandbox's infrastructure retry policy: linear backoff, two
    /// retries, before surfacing `TesterUnavailable`.
    #[must_use]
    pub const fn sandbox_infra() -> Self {
        Self::new(3, Duration::from_secs(1), Duration::from_secs(2))
    }

    /// Returns the backoff delay for the given zero-indexed attempt number,
    /// doubling each attempt and never exceeding `cap`.
    #[must_use]
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let scaled = self.base_backoff.as_millis().saturating_mul(u128::from(factor));
        let capped = scaled.min(self.cap.as_millis());
        Duration::from_millis(u64::try_from(capped).unwrap_or(u64::MAX))
    }

    /// Whether another attempt is permitted after `attempts_so_far` have
    /// already been made.
    #[must_use]
    pub const fn allows_attempt(&self, attempts_so_far: u32) -> bool {
        attempts_so_far < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::llm_transient_network();
        assert_eq!(policy.backoff_for_attempt(0), Duration::from_millis(50));
        assert_eq!(policy.backoff_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for_attempt(2), Duration::from_millis(200));
        // 50ms * 2^7 = 6400ms, capped at 5s
        assert_eq!(policy.backoff_for_attempt(7), Duration::from_secs(5));
    }

    #[test]
    fn allows_attempt_respects_max() {
        let policy = RetryPolicy::sandbox_infra();
        assert!(policy.allows_attempt(0));
        assert!(policy.allows_attempt(2));
        assert!(!policy.allows_attempt(3));
    }

    #[test]
    fn bus_publish_has_unbounded_attempts_but_bounded_delay() {
        let policy = RetryPolicy::bus_publish();
        assert!(policy.allows_attempt(1000));
        assert_eq!(policy.backoff_for_attempt(20), Duration::from_secs(5));
    }
}
