//! Reconnection Policy
//!
//! Exponential backoff with additive jitter for stream reconnection.
//! Attempt `N` (1-based) waits `min(cap, base * 2^(N-1) + jitter)` where
//! `jitter` is drawn uniformly from `[0, jitter_max]`. Retries are unlimited;
//! the counter resets on a successful open.

use std::time::Duration;

use rand::Rng;

/// Largest exponent applied to the base delay.
const MAX_EXPONENT: u32 = 20;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub base_delay: Duration,
    /// Upper bound on any single delay, jitter included.
    pub max_delay: Duration,
    /// Upper bound of the random delay added to each attempt.
    pub jitter_max: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_max: Duration::from_millis(500),
        }
    }
}

impl ReconnectConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(base_delay: Duration, max_delay: Duration, jitter_max: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter_max,
        }
    }
}

/// Reconnection policy implementing exponential backoff with jitter.
///
/// # Example
///
/// ```rust
/// use market_stream_mux::domain::connection::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::new(
///     Duration::from_millis(100),
///     Duration::from_secs(5),
///     Duration::ZERO,
/// ));
///
/// assert_eq!(policy.next_delay(), Duration::from_millis(100));
/// assert_eq!(policy.next_delay(), Duration::from_millis(200));
///
/// // Successful open
/// policy.reset();
/// assert_eq!(policy.next_delay(), Duration::from_millis(100));
/// ```
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Advance the attempt counter and return the delay before that attempt.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt_count = self.attempt_count.saturating_add(1);

        let exponent = (self.attempt_count - 1).min(MAX_EXPONENT);
        let exponential = self.config.base_delay.saturating_mul(1 << exponent);

        exponential
            .saturating_add(self.jitter())
            .min(self.config.max_delay)
    }

    /// Reset the policy after a successful connection.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Number of delays handed out since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    fn jitter(&self) -> Duration {
        let max_millis = u64::try_from(self.config.jitter_max.as_millis()).unwrap_or(u64::MAX);
        if max_millis == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max_millis))
    }
}
