//! Errors reported by queue providers.
//!
//! Every provider maps its failures onto [`QueueError`] so the pipeline can
//! decide between retrying, parking a message and giving up without knowing
//! which queue service it talks to.

use crate::provider::ProviderType;
use std::time::Duration;
use thiserror::Error;

/// Backoff suggested for a throttled request that carried no hint
const THROTTLE_BACKOFF: Duration = Duration::from_secs(2);

/// Backoff suggested after a request timed out
const TIMEOUT_BACKOFF: Duration = Duration::from_secs(1);

/// Failure of a single queue operation
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue '{queue}' does not exist")]
    QueueNotFound { queue: String },

    #[error("receipt '{receipt}' is unknown or has expired")]
    ReceiptInvalid { receipt: String },

    #[error("request timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("queue service unreachable: {message}")]
    ConnectionFailed { message: String },

    #[error("request throttled by the queue service")]
    Throttled { retry_after: Option<Duration> },

    #[error("credentials rejected: {message}")]
    AuthenticationFailed { message: String },

    #[error("not permitted to {operation}")]
    PermissionDenied { operation: String },

    #[error("message body of {size} bytes exceeds the {limit} byte limit")]
    MessageTooLarge { size: usize, limit: usize },

    #[error("queue '{queue}' is full ({capacity} messages)")]
    QueueFull { queue: String, capacity: usize },

    /// The service refused the request; resending it unchanged fails again
    #[error("{provider} rejected the request ({code}): {message}")]
    Rejected {
        provider: ProviderType,
        code: String,
        message: String,
    },

    /// Server-side failure
    #[error("{provider} failed ({code}): {message}")]
    Service {
        provider: ProviderType,
        code: String,
        message: String,
    },

    #[error(transparent)]
    Body(#[from] SerializationError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl QueueError {
    /// Whether the same request may succeed if sent again later
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::ConnectionFailed { .. }
                | Self::Throttled { .. }
                | Self::QueueFull { .. }
                | Self::Service { .. }
        )
    }

    pub fn should_retry(&self) -> bool {
        self.is_transient()
    }

    /// Minimum wait before retrying, when the failure implies one
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Throttled { retry_after } => Some(retry_after.unwrap_or(THROTTLE_BACKOFF)),
            Self::Timeout { .. } => Some(TIMEOUT_BACKOFF),
            _ => None,
        }
    }
}

/// A message body or provider response that cannot be represented
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("message body is not valid UTF-8 text")]
    NotUtf8,

    #[error("unexpected response from queue service: {detail}")]
    MalformedResponse { detail: String },
}

/// A provider setting that cannot be used
#[derive(Debug, Error)]
#[error("invalid setting '{setting}': {message}")]
pub struct ConfigurationError {
    pub setting: String,
    pub message: String,
}

impl ConfigurationError {
    pub fn new(setting: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            setting: setting.into(),
            message: message.into(),
        }
    }
}

/// An identifier that fails validation
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("{field} is longer than {max} characters")]
    TooLong { field: &'static str, max: usize },

    #[error("{field} is malformed: {reason}")]
    Malformed { field: &'static str, reason: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
