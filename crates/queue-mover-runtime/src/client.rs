//! Provider trait, per-queue client and provider factory.

use crate::error::QueueError;
use crate::message::{Message, MessageId, QueueName, ReceiptHandle, ReceivedMessage};
use crate::provider::{ProviderConfig, ProviderType};
use crate::providers::{AwsSqsProvider, InMemoryProvider};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

/// Operations a queue service offers the mover.
///
/// Implementations are shared between tasks, so every method takes `&self`.
#[async_trait]
pub trait QueueProvider: Send + Sync {
    /// Enqueue one message and return the id the queue assigned
    async fn send_message(
        &self,
        queue: &QueueName,
        message: &Message,
    ) -> Result<MessageId, QueueError>;

    /// Receive up to `max_messages` messages, waiting at most `wait` for the
    /// first one to arrive. Returning fewer messages, including none, is not
    /// an error.
    async fn receive_messages(
        &self,
        queue: &QueueName,
        max_messages: u32,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Delete a received message from its queue
    async fn complete_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError>;

    /// Make a received message visible again so it is redelivered
    async fn abandon_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError>;

    fn provider_type(&self) -> ProviderType;

    /// Most messages one receive call may return
    fn max_batch_size(&self) -> u32;
}

/// Client bound to a single queue on a shared provider.
///
/// This is the handle each pipeline stage receives at construction time; it
/// exposes the queue-service contract (receive, send, delete) plus release for
/// messages that could not be relayed.
#[derive(Clone)]
pub struct QueueClient {
    provider: Arc<dyn QueueProvider>,
    queue: QueueName,
}

impl QueueClient {
    pub fn new(provider: Arc<dyn QueueProvider>, queue: QueueName) -> Self {
        Self { provider, queue }
    }

    /// Queue this client is bound to
    pub fn queue(&self) -> &QueueName {
        &self.queue
    }

    pub fn provider_type(&self) -> ProviderType {
        self.provider.provider_type()
    }

    /// Receive up to `max_messages` messages
    pub async fn receive(
        &self,
        max_messages: u32,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let max_messages = max_messages.min(self.provider.max_batch_size());
        self.provider
            .receive_messages(&self.queue, max_messages, wait)
            .await
    }

    /// Send a message to this queue
    pub async fn send(&self, message: &Message) -> Result<MessageId, QueueError> {
        self.provider.send_message(&self.queue, message).await
    }

    /// Delete a message previously received from this queue
    pub async fn delete(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        self.provider.complete_message(receipt).await
    }

    /// Return a message previously received from this queue for redelivery
    pub async fn release(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        self.provider.abandon_message(receipt).await
    }
}

impl std::fmt::Debug for QueueClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueClient")
            .field("queue", &self.queue)
            .field("provider", &self.provider.provider_type())
            .finish()
    }
}

/// Builds the provider named by a [`ProviderConfig`]
pub struct ProviderFactory;

impl ProviderFactory {
    /// Create a provider to be shared by every client of a move.
    ///
    /// SQS credentials missing from the configuration are taken from the
    /// standard AWS environment variables.
    pub async fn create_provider(
        config: ProviderConfig,
    ) -> Result<Arc<dyn QueueProvider>, QueueError> {
        match config {
            ProviderConfig::InMemory(in_memory_config) => {
                Ok(Arc::new(InMemoryProvider::new(in_memory_config)))
            }
            ProviderConfig::AwsSqs(aws_config) => {
                let provider =
                    AwsSqsProvider::new(aws_config.with_environment_credentials()).await?;
                Ok(Arc::new(provider))
            }
        }
    }
}
