//! Exponential backoff shared by the request client and the channel client.
//!
//! # Example
//!
//! ```
//! use niu_core::retry::ExponentialBackoff;
//! use std::time::Duration;
//!
//! let policy = ExponentialBackoff::new(Duration::from_millis(1000), 3);
//! assert_eq!(policy.next_delay(0), Duration::from_millis(1000));
//! assert_eq!(policy.next_delay(2), Duration::from_millis(4000));
//! assert!(policy.should_retry(2));
//! assert!(!policy.should_retry(3));
//! ```

use std::time::Duration;

/// Base delay used by both presets.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Attempt limit for HTTP transport retries.
pub const HTTP_MAX_ATTEMPTS: u32 = 3;

/// Default attempt limit for channel reconnects.
pub const CHANNEL_MAX_ATTEMPTS: u32 = 10;

/// Delay doubles with every attempt: `base * 2^attempt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    base_delay: Duration,
    max_attempts: u32,
}

impl ExponentialBackoff {
    /// Create a policy.
    pub const fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_attempts,
        }
    }

    /// HTTP transport preset (1000 ms, 3 attempts).
    pub const fn http() -> Self {
        Self::new(DEFAULT_BASE_DELAY, HTTP_MAX_ATTEMPTS)
    }

    /// Channel reconnect preset (1000 ms, `max_attempts`).
    pub const fn channel(max_attempts: u32) -> Self {
        Self::new(DEFAULT_BASE_DELAY, max_attempts)
    }

    /// Base delay.
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Attempt limit.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry number `attempt` (0-based). Saturates instead of overflowing.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Whether retry number `attempt` (0-based) is allowed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::channel(CHANNEL_MAX_ATTEMPTS)
    }
}

/// Attempt counter driven by an [`ExponentialBackoff`].
#[derive(Debug, Clone)]
pub struct RetryState {
    policy: ExponentialBackoff,
    attempt: u32,
}

impl RetryState {
    /// Fresh counter at attempt 0.
    pub fn new(policy: ExponentialBackoff) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Consume one attempt, returning its delay, or `None` once the limit is reached.
    pub fn next(&mut self) -> Option<Duration> {
        if !self.policy.should_retry(self.attempt) {
            return None;
        }
        let delay = self.policy.next_delay(self.attempt);
        self.attempt += 1;
        Some(delay)
    }

    /// Reset after a success.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Attempts consumed since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Underlying policy.
    pub fn policy(&self) -> &ExponentialBackoff {
        &self.policy
    }
}
