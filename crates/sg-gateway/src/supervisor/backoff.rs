//! Exponential backoff for reconnection

use std::time::Duration;

use sg_core::config::BackoffConfig;

/// Exponential backoff with jitter and an attempt budget
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Delay handed out on the first attempt
    initial: Duration,
    /// Delay for the next attempt
    current: Duration,
    /// Maximum delay
    max: Duration,
    /// Multiplier
    multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    jitter: f64,
    /// Attempts allowed before giving up (0 = unlimited)
    max_attempts: u32,
    /// Attempts handed out since the last reset
    attempts: u32,
}

impl ExponentialBackoff {
    /// Create a new backoff from configuration
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(
            config.initial,
            config.max,
            config.multiplier,
            config.jitter,
            config.max_attempts,
        )
    }

    /// Create a new backoff with custom parameters
    pub fn new(
        initial: Duration,
        max: Duration,
        multiplier: f64,
        jitter: f64,
        max_attempts: u32,
    ) -> Self {
        Self {
            initial,
            current: initial,
            max,
            multiplier,
            jitter,
            max_attempts,
            attempts: 0,
        }
    }

    /// Get the next delay and advance the backoff
    ///
    /// Returns `None` once the attempt budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.exhausted() {
            return None;
        }
        self.attempts += 1;

        let delay = self.current;

        // Calculate next delay with multiplier
        let next = Duration::try_from_secs_f64(self.current.as_secs_f64() * self.multiplier)
            .unwrap_or(self.max);
        self.current = std::cmp::min(next, self.max);

        if self.jitter <= 0.0 {
            return Some(delay);
        }
        let jitter_amount = delay.as_secs_f64() * self.jitter * rand::random::<f64>();
        Some(delay + Duration::from_secs_f64(jitter_amount))
    }

    /// Whether the attempt budget is spent
    pub fn exhausted(&self) -> bool {
        self.max_attempts != 0 && self.attempts >= self.max_attempts
    }

    /// Attempts handed out since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Reset to the initial delay and a full attempt budget
    pub fn reset(&mut self) {
        self.current = self.initial;
        self.attempts = 0;
    }
}
