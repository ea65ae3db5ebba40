//! Delay between supervisor attempts.

use std::time::Duration;

/// Default delay before the first retry.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Longest delay between two attempts.
pub const MAX_BACKOFF: Duration = Duration::from_secs(8);

/// Exponential backoff: the delay doubles after every failed attempt until it
/// reaches the cap. A zero initial delay never sleeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    initial: Duration,
    max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: DEFAULT_INITIAL_BACKOFF,
            max: MAX_BACKOFF,
        }
    }
}

impl BackoffPolicy {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
        }
    }

    /// Policy that retries immediately.
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Delay after `failed_attempts` consecutive failures.
    ///
    /// No failures: no delay
    /// 1 failure: `initial`
    /// 2 failures: `2 * initial`
    /// 3 failures: `4 * initial`
    /// and so on, capped at `max`.
    pub fn delay(&self, failed_attempts: u32) -> Duration {
        if failed_attempts == 0 || self.initial.is_zero() {
            return Duration::ZERO;
        }
        let exponent = failed_attempts - 1;
        // 2^31 already exceeds any useful cap
        let factor = if exponent >= 31 {
            u32::MAX
        } else {
            1u32 << exponent
        };
        self.initial.saturating_mul(factor).min(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_failures_no_delay() {
        assert_eq!(BackoffPolicy::default().delay(0), Duration::ZERO);
    }

    #[test]
    fn test_first_retry_waits_one_second() {
        assert_eq!(BackoffPolicy::default().delay(1), Duration::from_secs(1));
    }

    #[test]
    fn test_delay_doubles() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(2), Duration::from_secs(2));
        assert_eq!(policy.delay(3), Duration::from_secs(4));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(4), MAX_BACKOFF);
        assert_eq!(policy.delay(30), MAX_BACKOFF);
        assert_eq!(policy.delay(u32::MAX), MAX_BACKOFF);
    }

    #[test]
    fn test_immediate_never_sleeps() {
        let policy = BackoffPolicy::immediate();
        assert_eq!(policy.delay(1), Duration::ZERO);
        assert_eq!(policy.delay(10), Duration::ZERO);
    }

    #[test]
    fn test_max_below_initial_is_raised() {
        let policy = BackoffPolicy::new(Duration::from_millis(500), Duration::from_millis(100));
        assert_eq!(policy.delay(3), Duration::from_millis(500));
    }
}
