//! Backoff for transient queue failures.
//!
//! The fetch stage retries receives; the forward stage retries sends and
//! deletes. Each operation takes a fresh [`RetryState`] from the shared
//! [`RetryPolicy`].

use crate::config::RetrySettings;
use rand::Rng;
use std::time::Duration;

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;

/// Fraction of each delay randomised when jitter is enabled
const DEFAULT_JITTER: f64 = 0.25;

/// Exponential backoff with an upper bound and optional jitter.
///
/// ```rust
/// use queue_mover_core::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new(3, Duration::from_millis(500), Duration::from_secs(2));
/// assert_eq!(policy.delay(0), Duration::from_millis(500));
/// assert_eq!(policy.delay(1), Duration::from_secs(1));
/// assert_eq!(policy.delay(5), Duration::from_secs(2));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    retries: u32,
    first_delay: Duration,
    ceiling: Duration,
    multiplier: f64,
    jitter: f64,
}

impl RetryPolicy {
    /// Doubling delays without jitter
    pub fn new(retries: u32, first_delay: Duration, ceiling: Duration) -> Self {
        Self {
            retries,
            first_delay,
            ceiling,
            multiplier: 2.0,
            jitter: 0.0,
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    /// Randomise each delay by up to `fraction` of itself, either way
    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter = fraction.clamp(0.0, 1.0);
        self
    }

    /// Retries allowed after the first attempt
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// No delay is ever longer than this
    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }

    /// Delay before retry number `retry`, counting from zero
    pub fn delay(&self, retry: u32) -> Duration {
        let exponent = retry.min(i32::MAX as u32) as i32;
        let secs = (self.first_delay.as_secs_f64() * self.multiplier.powi(exponent))
            .min(self.ceiling.as_secs_f64());

        if self.jitter <= 0.0 || secs <= 0.0 {
            return Duration::from_secs_f64(secs);
        }
        let spread = secs * self.jitter;
        let jittered = secs + rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_secs_f64(jittered.clamp(0.0, self.ceiling.as_secs_f64()))
    }

    /// Start tracking one operation whose first attempt is under way
    pub fn begin(&self) -> RetryState<'_> {
        RetryState {
            policy: self,
            attempts: 1,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        let policy = Self::new(
            settings.max_attempts,
            Duration::from_millis(settings.initial_delay_ms),
            Duration::from_millis(settings.max_delay_ms),
        )
        .with_multiplier(settings.backoff_multiplier);

        if settings.use_jitter {
            policy.with_jitter(DEFAULT_JITTER)
        } else {
            policy
        }
    }
}

/// Attempts made by one operation under a [`RetryPolicy`]
#[derive(Debug)]
pub struct RetryState<'a> {
    policy: &'a RetryPolicy,
    attempts: u32,
}

impl RetryState<'_> {
    /// Attempts made or started so far, the first included
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Claim another attempt and return how long to wait before it.
    ///
    /// `hint` is the wait the failure itself asked for; it replaces the
    /// computed delay but still respects the ceiling. Returns `None` once the
    /// retries are spent.
    pub fn next_delay(&mut self, hint: Option<Duration>) -> Option<Duration> {
        let retry = self.attempts - 1;
        if retry >= self.policy.retries {
            return None;
        }
        self.attempts += 1;

        let delay = hint.unwrap_or_else(|| self.policy.delay(retry));
        Some(delay.min(self.policy.ceiling))
    }
}
