//! Shared helpers for the stage and coordinator tests.

use crate::config::{MoverConfig, RetrySettings};
use async_trait::async_trait;
use bytes::Bytes;
use queue_mover_runtime::{
    InMemoryProvider, Message, MessageId, ProviderType, QueueClient, QueueError, QueueName,
    QueueProvider, ReceiptHandle, ReceivedMessage,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub(crate) fn queue(name: &str) -> QueueName {
    QueueName::new(name.to_string()).unwrap()
}

/// Defaults with fast, deterministic retries
pub(crate) fn test_config() -> MoverConfig {
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

pub(crate) async fn seed(provider: &InMemoryProvider, queue: &QueueName, count: usize) {
    for i in 0..count {
        provider
            .send_message(queue, &Message::from(format!("message-{}", i).as_str()))
            .await
            .unwrap();
    }
}

pub(crate) fn client(provider: Arc<dyn QueueProvider>, name: &str) -> QueueClient {
    QueueClient::new(provider, queue(name))
}

/// In-memory provider with injectable failures and call counters
pub(crate) struct ScriptedProvider {
    pub inner: InMemoryProvider,
    receive_failures: AtomicU32,
    send_failures: AtomicU32,
    failing_bodies: Vec<Bytes>,
    delete_failures: AtomicU32,
    failures_transient: bool,
    pub receives: AtomicU32,
    pub sends: AtomicU32,
    pub deletes: AtomicU32,
    pub releases: AtomicU32,
}

impl ScriptedProvider {
    pub fn new(inner: InMemoryProvider) -> Self {
        Self {
            inner,
            receive_failures: AtomicU32::new(0),
            send_failures: AtomicU32::new(0),
            failing_bodies: Vec::new(),
            delete_failures: AtomicU32::new(0),
            failures_transient: true,
            receives: AtomicU32::new(0),
            sends: AtomicU32::new(0),
            deletes: AtomicU32::new(0),
            releases: AtomicU32::new(0),
        }
    }

    pub fn fail_receives(self, count: u32) -> Self {
        self.receive_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Fail the next `count` sends; `u32::MAX` fails every send
    pub fn fail_sends(self, count: u32) -> Self {
        self.send_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Fail every send of a message with one of these bodies
    pub fn fail_sends_of(mut self, bodies: &[&str]) -> Self {
        self.failing_bodies = bodies.iter().map(|b| Bytes::from(b.to_string())).collect();
        self
    }

    pub fn fail_deletes(self, count: u32) -> Self {
        self.delete_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn permanent_failures(mut self) -> Self {
        self.failures_transient = false;
        self
    }

    fn take_failure(&self, counter: &AtomicU32, operation: &str) -> Result<(), QueueError> {
        let failing = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
                0 => None,
                u32::MAX => Some(u32::MAX),
                n => Some(n - 1),
            })
            .is_ok();
        self.failure(failing, operation)
    }

    fn failure(&self, failing: bool, operation: &str) -> Result<(), QueueError> {
        match (failing, self.failures_transient) {
            (false, _) => Ok(()),
            (true, true) => Err(QueueError::ConnectionFailed {
                message: format!("injected {} failure", operation),
            }),
            (true, false) => Err(QueueError::PermissionDenied {
                operation: operation.to_string(),
            }),
        }
    }
}

#[async_trait]
impl QueueProvider for ScriptedProvider {
    async fn send_message(
        &self,
        queue: &QueueName,
        message: &Message,
    ) -> Result<MessageId, QueueError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        self.take_failure(&self.send_failures, "send")?;
        self.failure(self.failing_bodies.contains(&message.body), "send")?;
        self.inner.send_message(queue, message).await
    }

    async fn receive_messages(
        &self,
        queue: &QueueName,
        max_messages: u32,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        self.receives.fetch_add(1, Ordering::SeqCst);
        self.take_failure(&self.receive_failures, "receive")?;
        self.inner.receive_messages(queue, max_messages, wait).await
    }

    async fn complete_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.take_failure(&self.delete_failures, "delete")?;
        self.inner.complete_message(receipt).await
    }

    async fn abandon_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.inner.abandon_message(receipt).await
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }

    fn max_batch_size(&self) -> u32 {
        self.inner.max_batch_size()
    }
}
