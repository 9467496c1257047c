//! Pipeline configuration.

use crate::error::MoverError;
use crate::relay::DEFAULT_CAPACITY;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Largest batch a single SQS receive returns
pub const MAX_BATCH_SIZE: u32 = 10;

/// Settings for a move between two queues
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MoverConfig {
    /// Relay buffer capacity in messages
    pub buffer_capacity: usize,

    /// Messages requested per receive (1 to 10)
    pub batch_size: u32,

    /// Stop after fetching this many messages; unbounded when absent
    pub max_messages: Option<u64>,

    /// Forward stage exits after this long without a dequeue
    pub idle_timeout_seconds: u64,

    /// How long each forward-stage dequeue waits
    pub poll_interval_ms: u64,

    /// Long-poll wait passed to each receive
    pub receive_wait_seconds: u64,

    /// How often the coordinator checks whether the stages are alive
    pub liveness_interval_ms: u64,

    /// Grace period for the forward stage to drain after an interrupt
    pub shutdown_timeout_seconds: u64,

    /// Forward stage fails after this many messages in a row could not be sent
    pub max_consecutive_parks: u32,

    pub retry: RetrySettings,
}

impl Default for MoverConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_CAPACITY,
            batch_size: MAX_BATCH_SIZE,
            max_messages: None,
            idle_timeout_seconds: 5,
            poll_interval_ms: 1000,
            receive_wait_seconds: 1,
            liveness_interval_ms: 1000,
            shutdown_timeout_seconds: 30,
            max_consecutive_parks: 10,
            retry: RetrySettings::default(),
        }
    }
}

impl MoverConfig {
    /// Check that the settings describe a runnable pipeline
    pub fn validate(&self) -> Result<(), MoverError> {
        if self.buffer_capacity == 0 {
            return Err(MoverError::invalid_configuration(
                "buffer_capacity",
                "must be greater than zero",
            ));
        }

        if !(1..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            return Err(MoverError::invalid_configuration(
                "batch_size",
                format!("must be between 1 and {}", MAX_BATCH_SIZE),
            ));
        }

        if self.idle_timeout_seconds == 0 {
            return Err(MoverError::invalid_configuration(
                "idle_timeout_seconds",
                "must be greater than zero",
            ));
        }

        if self.poll_interval_ms == 0 {
            return Err(MoverError::invalid_configuration(
                "poll_interval_ms",
                "must be greater than zero",
            ));
        }

        if self.liveness_interval_ms == 0 {
            return Err(MoverError::invalid_configuration(
                "liveness_interval_ms",
                "must be greater than zero",
            ));
        }

        if self.max_consecutive_parks == 0 {
            return Err(MoverError::invalid_configuration(
                "max_consecutive_parks",
                "must be greater than zero",
            ));
        }

        self.retry.validate()
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn receive_wait(&self) -> Duration {
        Duration::from_secs(self.receive_wait_seconds)
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }
}

/// Backoff settings for transient queue failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Retries after the initial attempt
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub use_jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 1000,
            max_delay_ms: 16_000,
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }
}

impl RetrySettings {
    fn validate(&self) -> Result<(), MoverError> {
        if !(self.backoff_multiplier.is_finite() && self.backoff_multiplier >= 1.0) {
            return Err(MoverError::invalid_configuration(
                "retry.backoff_multiplier",
                "must be a finite number of at least 1.0",
            ));
        }

        if self.initial_delay_ms > self.max_delay_ms {
            return Err(MoverError::invalid_configuration(
                "retry.initial_delay_ms",
                "must not exceed retry.max_delay_ms",
            ));
        }

        Ok(())
    }
}
