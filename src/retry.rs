//! Exponential backoff policy for `send_message_with_retry`.
//!
//! Delay grows per attempt, `min(base * 2^attempt, max)`. Whether an attempt
//! is worth repeating is decided by [`ErrorKind::is_retryable`], never by
//! inspecting error text.

use std::time::Duration;

/// Per-call retry options.
#[derive(Debug, Clone)]
pub struct RetryOptions {
    /// Additional attempts after the first (0 = single attempt).
    pub max_retries: u32,
    /// Backoff base; attempt N sleeps `min(base * 2^N, max_delay)`.
    pub retry_delay: Duration,
    /// Backoff ceiling.
    pub max_delay: Duration,
    /// Per-attempt reply deadline.
    pub timeout: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    base: Duration,
    max: Duration,
}

impl RetryPolicy {
    pub(crate) fn new(base: Duration, max: Duration) -> Self {
        Self {
            base: base.max(Duration::from_millis(1)),
            max,
        }
    }

    /// Backoff before re-attempting after failed attempt `attempt` (0-based).
    pub(crate) fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base.saturating_mul(factor).min(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_per_attempt() {
        let policy = RetryPolicy::new(Duration::from_millis(100), Duration::from_secs(10));
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
        assert_eq!(policy.delay(3), Duration::from_millis(800));
    }

    #[test]
    fn delay_is_capped() {
        let policy = RetryPolicy::new(Duration::from_millis(100), Duration::from_millis(500));
        assert_eq!(policy.delay(4), Duration::from_millis(500));
        // Large attempt numbers saturate instead of overflowing.
        assert_eq!(policy.delay(40), Duration::from_millis(500));
    }
}
