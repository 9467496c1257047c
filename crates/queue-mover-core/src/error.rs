//! Error types for the relay pipeline.

use queue_mover_runtime::QueueError;
use std::fmt;
use thiserror::Error;

/// Pipeline stage identifier used in errors and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Fetch,
    Forward,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch => write!(f, "fetch"),
            Self::Forward => write!(f, "forward"),
        }
    }
}

/// Errors raised while setting up or running a move
#[derive(Debug, Error)]
pub enum MoverError {
    #[error("Queue operation failed: {0}")]
    Queue(#[from] QueueError),

    #[error("The {stage} stage failed: {message}")]
    StageFailed { stage: Stage, message: String },

    #[error("The {stage} stage terminated abnormally: {message}")]
    StageAborted { stage: Stage, message: String },

    #[error("Invalid configuration for '{field}': {message}")]
    InvalidConfiguration { field: String, message: String },
}

impl MoverError {
    /// Create an invalid configuration error for `field`
    pub fn invalid_configuration(field: &str, message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// Stage the error originated from, if any
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::StageFailed { stage, .. } | Self::StageAborted { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
