// Retry policy shared by queue backends
// Redelivery is a backend concern; this only computes the decision.
use crate::application::worker::constants::{DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_BASE_DELAY_MS};
use crate::domain::DispatchOptions;
use tracing::{debug, warn};

/// Retry decision result
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Redeliver after the given backoff delay (ms)
    Retry(u64),
    /// Attempt budget exhausted, move to dead letters
    DeadLetter,
}

/// Exponential backoff retry policy
///
/// delay = backoff_ms * 2^(attempt - 1) * (1.0 ± 0.1)
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    default_max_attempts: u32,
    default_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_BASE_DELAY_MS)
    }
}

impl RetryPolicy {
    /// Create a new retry policy
    ///
    /// # Arguments
    /// * `default_max_attempts` - Attempts when a dispatch does not set `attempts`
    /// * `default_backoff_ms` - Base delay when a dispatch does not set `backoff_ms`
    pub fn new(default_max_attempts: u32, default_backoff_ms: u64) -> Self {
        Self {
            default_max_attempts: default_max_attempts.max(1),
            default_backoff_ms,
        }
    }

    /// Attempt budget for a dispatch (never below 1)
    pub fn max_attempts(&self, options: &DispatchOptions) -> u32 {
        options.attempts.unwrap_or(self.default_max_attempts).max(1)
    }

    /// Base backoff for a dispatch
    pub fn backoff_ms(&self, options: &DispatchOptions) -> u64 {
        options.backoff_ms.unwrap_or(self.default_backoff_ms)
    }

    /// Decide what happens to a delivery that just failed on `attempt` (1-based)
    pub fn decide(
        &self,
        message_id: &str,
        attempt: u32,
        max_attempts: u32,
        backoff_ms: u64,
    ) -> RetryDecision {
        if attempt >= max_attempts {
            warn!(
                message_id = %message_id,
                attempt = attempt,
                max_attempts = max_attempts,
                "Max delivery attempts reached"
            );
            return RetryDecision::DeadLetter;
        }

        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let base_delay_ms = backoff_ms as f64 * 2f64.powi(exponent);

        // ±10% jitter, seeded by the message id so redeliveries of one message are stable
        let jitter_seed = message_id.chars().map(|c| c as u32).sum::<u32>();
        let jitter_factor = 0.9 + ((jitter_seed % 21) as f64 / 100.0);

        let delay_ms = (base_delay_ms * jitter_factor) as u64;

        debug!(
            message_id = %message_id,
            attempt = attempt,
            max_attempts = max_attempts,
            delay_ms = delay_ms,
            "Scheduling redelivery"
        );

        RetryDecision::Retry(delay_ms)
    }
}
