//! Retry budget for optimistic transactions
//!
//! Contains RetryConfig for transaction retry behavior.

use std::time::Duration;

/// Configuration for transaction retry behavior
///
/// Controls how many times a builder is re-invoked after its operation set is
/// rejected by an assertion, and how long to back off between attempts.
///
/// # Example
///
/// ```ignore
/// let config = RetryConfig {
///     max_attempts: 5,
///     base_delay_ms: 1,
///     max_delay_ms: 20,
/// };
/// let runner = TxnRunner::new(store, config);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts, including the first (values below 1 are treated as 1)
    pub max_attempts: usize,
    /// Base delay between attempts in milliseconds (exponential backoff)
    pub base_delay_ms: u64,
    /// Maximum delay between attempts in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 0,
            max_delay_ms: 20,
        }
    }
}

impl RetryConfig {
    /// Create a new RetryConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a RetryConfig that never retries
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Set the total number of attempts
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set base delay for exponential backoff
    pub fn with_base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    /// Set maximum delay between attempts
    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Attempts actually granted
    pub fn attempts(&self) -> usize {
        self.max_attempts.max(1)
    }

    /// Calculate delay after a failed attempt (exponential backoff)
    pub fn calculate_delay(&self, attempt: usize) -> Duration {
        // Cap the shift to prevent overflow
        let shift = attempt.min(63);
        let multiplier = 1u64 << shift;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier);
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }
}
