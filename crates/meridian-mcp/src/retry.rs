//! Exponential backoff for reconnect attempts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff schedule consulted before reconnecting a failed server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries (caps the exponential growth).
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub exponential_base: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::restart()
    }
}

impl RetryConfig {
    /// Creates a new retry configuration.
    #[must_use]
    pub const fn new(initial_delay: Duration, max_delay: Duration, exponential_base: u32) -> Self {
        Self {
            initial_delay,
            max_delay,
            exponential_base,
        }
    }

    /// Schedule used for server restarts: 30s, doubling, capped at 5 minutes.
    #[must_use]
    pub const fn restart() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_secs(300), 2)
    }

    /// Calculates the delay owed before attempt number `attempt` (0-indexed).
    ///
    /// Attempt 0 is immediate; later attempts grow exponentially up to
    /// `max_delay`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let factor = self
            .exponential_base
            .checked_pow(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);

        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}
