//! Common test utilities for queue-mover integration tests
//!
//! This module provides:
//! - A recording provider that logs every queue operation with its body
//! - Failure injection for the destination queue
//! - Helpers for seeding queues and building coordinators

use async_trait::async_trait;
use bytes::Bytes;
use queue_mover_core::{Coordinator, MoverConfig, RetrySettings};
use queue_mover_runtime::{
    InMemoryProvider, Message, MessageId, ProviderType, QueueClient, QueueError, QueueName,
    QueueProvider, ReceiptHandle, ReceivedMessage,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SOURCE: &str = "orders";
pub const DESTINATION: &str = "orders-v2";

// ============================================================================
// Recorded Operations
// ============================================================================

/// A queue operation as observed by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(dead_code)]
pub enum Op {
    Receive { queue: String, body: Bytes },
    Send { queue: String, body: Bytes },
    Delete { queue: String, body: Bytes },
    Abandon { queue: String, body: Bytes },
}

// ============================================================================
// Recording Provider
// ============================================================================

/// In-memory provider that records every successful operation in order
#[derive(Clone)]
pub struct RecordingProvider {
    pub inner: InMemoryProvider,
    log: Arc<Mutex<Vec<Op>>>,
    receipts: Arc<Mutex<HashMap<String, Bytes>>>,
    fail_sends: Arc<AtomicBool>,
    max_per_receive: Option<u32>,
}

impl RecordingProvider {
    pub fn new() -> Self {
        Self {
            inner: InMemoryProvider::default(),
            log: Arc::new(Mutex::new(Vec::new())),
            receipts: Arc::new(Mutex::new(HashMap::new())),
            fail_sends: Arc::new(AtomicBool::new(false)),
            max_per_receive: None,
        }
    }

    /// Return at most `count` messages from each receive call
    #[allow(dead_code)]
    pub fn with_max_per_receive(mut self, count: u32) -> Self {
        self.max_per_receive = Some(count);
        self
    }

    /// Make every send fail with a transient error
    #[allow(dead_code)]
    pub fn fail_sends(&self, failing: bool) {
        self.fail_sends.store(failing, Ordering::SeqCst);
    }

    pub fn ops(&self) -> Vec<Op> {
        self.log.lock().unwrap().clone()
    }

    /// Bodies currently stored in `name`, visible or in flight
    pub fn bodies(&self, name: &str) -> Vec<Bytes> {
        self.inner.bodies(&queue(name))
    }

    #[allow(dead_code)]
    pub fn visible_count(&self, name: &str) -> usize {
        self.inner.visible_count(&queue(name))
    }

    /// Bodies sent to `name`, in send order
    #[allow(dead_code)]
    pub fn sent_to(&self, name: &str) -> Vec<Bytes> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::Send { queue, body } if queue == name => Some(body),
                _ => None,
            })
            .collect()
    }

    fn record(&self, op: Op) {
        self.log.lock().unwrap().push(op);
    }

    fn body_for(&self, receipt: &ReceiptHandle) -> Bytes {
        self.receipts
            .lock()
            .unwrap()
            .get(receipt.handle())
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl QueueProvider for RecordingProvider {
    async fn send_message(
        &self,
        queue: &QueueName,
        message: &Message,
    ) -> Result<MessageId, QueueError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(QueueError::ConnectionFailed {
                message: "destination unavailable".to_string(),
            });
        }
        let id = self.inner.send_message(queue, message).await?;
        self.record(Op::Send {
            queue: queue.to_string(),
            body: message.body.clone(),
        });
        Ok(id)
    }

    async fn receive_messages(
        &self,
        queue: &QueueName,
        max_messages: u32,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let max_messages = match self.max_per_receive {
            Some(cap) => max_messages.min(cap),
            None => max_messages,
        };
        let messages = self.inner.receive_messages(queue, max_messages, wait).await?;
        for message in &messages {
            self.receipts.lock().unwrap().insert(
                message.receipt_handle.handle().to_string(),
                message.body.clone(),
            );
            self.record(Op::Receive {
                queue: queue.to_string(),
                body: message.body.clone(),
            });
        }
        Ok(messages)
    }

    async fn complete_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        self.inner.complete_message(receipt).await?;
        self.record(Op::Delete {
            queue: receipt.queue().to_string(),
            body: self.body_for(receipt),
        });
        Ok(())
    }

    async fn abandon_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        self.inner.abandon_message(receipt).await?;
        self.record(Op::Abandon {
            queue: receipt.queue().to_string(),
            body: self.body_for(receipt),
        });
        Ok(())
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }

    fn max_batch_size(&self) -> u32 {
        self.inner.max_batch_size()
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub fn queue(name: &str) -> QueueName {
    QueueName::new(name.to_string()).unwrap()
}

pub fn body(i: usize) -> Bytes {
    Bytes::from(format!("order-{:03}", i))
}

/// Put `count` messages on `name` directly, bypassing the operation log
pub async fn seed(provider: &RecordingProvider, name: &str, count: usize) {
    for i in 0..count {
        provider
            .inner
            .send_message(&queue(name), &Message::new(body(i)))
            .await
            .unwrap();
    }
}

/// Defaults with short deterministic retries
pub fn test_config() -> MoverConfig {
    MoverConfig {
        retry: RetrySettings {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 400,
            backoff_multiplier: 2.0,
            use_jitter: false,
        },
        ..Default::default()
    }
}

pub fn coordinator(provider: &RecordingProvider, config: MoverConfig) -> Coordinator {
    let provider: Arc<dyn QueueProvider> = Arc::new(provider.clone());
    Coordinator::new(
        QueueClient::new(provider.clone(), queue(SOURCE)),
        QueueClient::new(provider, queue(DESTINATION)),
        config,
    )
    .unwrap()
}
