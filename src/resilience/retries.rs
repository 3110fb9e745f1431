//! Retry policy for submissions neither processor accepted.
//!
//! # Responsibilities
//! - Decide whether a submission gets another dispatch cycle
//! - Compute how long the next cycle must wait
//!
//! # Design Decisions
//! - Attempts count whole dispatch cycles (default then fallback), not single calls
//! - No cap means retry forever, which is what a payment that must not be lost wants
//!   while processors are expected to recover
//! - Jittered backoff keeps a queue full of failures from hammering a recovering processor

use std::time::Duration;

use crate::config::RetryConfig;
use crate::resilience::backoff::calculate_backoff;

/// Attempt cap plus backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: Option<u32>,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
        }
    }

    /// Retry forever with the given backoff bounds.
    pub fn unlimited(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts: None,
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// Whether a submission that has failed `attempts` cycles may try again.
    pub fn allows_retry(&self, attempts: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempts < max)
    }

    /// Delay before the next cycle, or `None` when the cap has been reached.
    pub fn next_delay(&self, attempts: u32) -> Option<Duration> {
        if !self.allows_retry(attempts) {
            return None;
        }
        Some(calculate_backoff(attempts, self.base_delay_ms, self.max_delay_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&RetryConfig::default())
    }
}
