//! Queue identifiers and the messages relayed between queues.

use crate::error::{SerializationError, ValidationError};
use crate::provider::ProviderType;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Longest queue name SQS accepts, `.fifo` suffix included
const MAX_QUEUE_NAME_LEN: usize = 80;

const FIFO_SUFFIX: &str = ".fifo";

/// Provider attribute carrying the FIFO message group
pub const GROUP_ID_ATTRIBUTE: &str = "MessageGroupId";

// ============================================================================
// Queue Names
// ============================================================================

/// A queue, given either as a bare name or as a full queue URL.
///
/// Bare names are 1-80 characters of ASCII alphanumerics, hyphens and
/// underscores, optionally ending in `.fifo`. URLs are kept as given and used
/// without a name lookup by providers that understand them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueueName(String);

impl QueueName {
    pub fn new(name: String) -> Result<Self, ValidationError> {
        if is_url(&name) {
            url::Url::parse(&name).map_err(|e| ValidationError::Malformed {
                field: "queue URL",
                reason: e.to_string(),
            })?;
        } else {
            validate_bare_name(&name)?;
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_url(&self) -> bool {
        is_url(&self.0)
    }

    /// FIFO queues need a message group on every send
    pub fn is_fifo(&self) -> bool {
        self.0.ends_with(FIFO_SUFFIX)
    }
}

fn is_url(name: &str) -> bool {
    name.starts_with("https://") || name.starts_with("http://")
}

fn validate_bare_name(name: &str) -> Result<(), ValidationError> {
    let stem = name.strip_suffix(FIFO_SUFFIX).unwrap_or(name);
    if stem.is_empty() {
        return Err(ValidationError::Empty {
            field: "queue name",
        });
    }
    if name.len() > MAX_QUEUE_NAME_LEN {
        return Err(ValidationError::TooLong {
            field: "queue name",
            max: MAX_QUEUE_NAME_LEN,
        });
    }
    if let Some(bad) = stem
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(ValidationError::Malformed {
            field: "queue name",
            reason: format!("'{}' is not allowed; use letters, digits, '-' or '_'", bad),
        });
    }
    Ok(())
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for QueueName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<QueueName> for String {
    fn from(name: QueueName) -> Self {
        name.0
    }
}

// ============================================================================
// Message Identifiers
// ============================================================================

/// Identifier a queue assigned to a message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Random identifier, for providers that do not assign their own
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Empty {
                field: "message id",
            });
        }
        Ok(Self(s.to_string()))
    }
}

// ============================================================================
// Messages
// ============================================================================

/// A message to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub body: Bytes,
    /// FIFO message group; ignored by standard queues
    pub group_id: Option<String>,
    /// Identity of the message for FIFO deduplication, stable across resends
    pub deduplication_id: Option<String>,
}

impl Message {
    pub fn new(body: Bytes) -> Self {
        Self {
            body,
            group_id: None,
            deduplication_id: None,
        }
    }

    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_deduplication_id(mut self, deduplication_id: impl Into<String>) -> Self {
        self.deduplication_id = Some(deduplication_id.into());
        self
    }

    /// The body as UTF-8, for queue services that only carry text
    pub fn body_text(&self) -> Result<&str, SerializationError> {
        std::str::from_utf8(&self.body).map_err(|_| SerializationError::NotUtf8)
    }
}

impl From<&str> for Message {
    fn from(body: &str) -> Self {
        Self::new(Bytes::copy_from_slice(body.as_bytes()))
    }
}

/// A message taken from a queue, held invisible until deleted or released
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message_id: MessageId,
    pub body: Bytes,
    /// Attributes reported by the provider, such as `ApproximateReceiveCount`
    pub attributes: HashMap<String, String>,
    pub receipt_handle: ReceiptHandle,
    /// How many times the message has been received, this time included
    pub delivery_count: u32,
    pub received_at: DateTime<Utc>,
}

impl ReceivedMessage {
    /// The message to send downstream.
    ///
    /// The body is relayed byte for byte together with its FIFO group. The
    /// source message id becomes the deduplication id, so two messages with
    /// equal bodies stay distinct while a redelivery of the same message does
    /// not. Other provider attributes stay behind.
    pub fn message(&self) -> Message {
        Message {
            body: self.body.clone(),
            group_id: self.attributes.get(GROUP_ID_ATTRIBUTE).cloned(),
            deduplication_id: Some(self.message_id.to_string()),
        }
    }
}

/// Token that deletes or releases one received message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptHandle {
    handle: String,
    queue: QueueName,
    provider_type: ProviderType,
}

impl ReceiptHandle {
    pub fn new(handle: String, queue: QueueName, provider_type: ProviderType) -> Self {
        Self {
            handle,
            queue,
            provider_type,
        }
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// Queue the message was received from
    pub fn queue(&self) -> &QueueName {
        &self.queue
    }

    pub fn provider_type(&self) -> ProviderType {
        self.provider_type
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
