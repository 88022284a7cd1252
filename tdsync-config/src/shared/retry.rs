use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Retry policy for transient warehouse failures.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,

    /// Delay, in milliseconds, before the first retry.
    pub initial_delay_ms: u64,

    /// Upper bound for the delay between two attempts.
    pub max_delay_ms: u64,

    /// Multiplier applied to the delay after each failed attempt.
    pub backoff_factor: f32,
}

impl RetryConfig {
    /// Returns the delay to wait after the failed attempt number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let delay_ms = self.initial_delay_ms as f64 * (self.backoff_factor as f64).powi(exponent);
        let capped = delay_ms.min(self.max_delay_ms as f64);

        Duration::from_millis(capped as u64)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_attempts == 0 {
            return Err(ValidationError::RetryMaxAttemptsZero);
        }

        if self.backoff_factor.is_nan() || self.backoff_factor < 1.0 {
            return Err(ValidationError::RetryBackoffFactorTooSmall(
                self.backoff_factor,
            ));
        }

        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
            backoff_factor: 2.0,
        }
    }
}
