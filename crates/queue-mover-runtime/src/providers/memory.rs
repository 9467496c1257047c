//! Queues held in process memory.
//!
//! Messages are kept in arrival order. A received message is leased: hidden
//! until it is deleted, released or its visibility timeout lapses, after
//! which it is redelivered ahead of newer messages.
//!
//! Time comes from the tokio clock, so a paused test clock drives visibility
//! timeouts and receive waits.

use crate::client::QueueProvider;
use crate::error::QueueError;
use crate::message::{
    Message, MessageId, QueueName, ReceiptHandle, ReceivedMessage, GROUP_ID_ATTRIBUTE,
};
use crate::provider::{InMemoryConfig, ProviderType};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::time::Instant;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

/// How often a waiting receive looks for new messages
const RECEIVE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Every queue of one provider
struct Broker {
    queues: HashMap<QueueName, QueueState>,
    config: InMemoryConfig,
}

impl Broker {
    fn new(config: InMemoryConfig) -> Self {
        Self {
            queues: HashMap::new(),
            config,
        }
    }

    /// Queues spring into existence on first use
    fn queue_mut(&mut self, queue: &QueueName) -> &mut QueueState {
        self.queues.entry(queue.clone()).or_default()
    }
}

#[derive(Default)]
struct QueueState {
    visible: VecDeque<Stored>,
    /// Leased messages by receipt token
    leased: HashMap<String, Lease>,
}

impl QueueState {
    fn len(&self) -> usize {
        self.visible.len() + self.leased.len()
    }

    fn end_lease(&mut self, receipt: &ReceiptHandle) -> Result<Lease, QueueError> {
        self.leased
            .remove(receipt.handle())
            .ok_or_else(|| QueueError::ReceiptInvalid {
                receipt: receipt.handle().to_string(),
            })
    }

    /// Return lapsed leases to the front, oldest lease first
    fn expire_leases(&mut self) {
        let now = Instant::now();
        let mut lapsed: Vec<_> = self
            .leased
            .iter()
            .filter(|(_, lease)| lease.hidden_until <= now)
            .map(|(receipt, lease)| (lease.sequence, receipt.clone()))
            .collect();
        lapsed.sort_unstable();

        for (_, receipt) in lapsed.into_iter().rev() {
            if let Some(lease) = self.leased.remove(&receipt) {
                self.visible.push_front(lease.message);
            }
        }
    }
}

#[derive(Clone)]
struct Stored {
    message_id: MessageId,
    body: Bytes,
    group_id: Option<String>,
    delivery_count: u32,
}

impl Stored {
    fn new(message: &Message, message_id: MessageId) -> Self {
        Self {
            message_id,
            body: message.body.clone(),
            group_id: message.group_id.clone(),
            delivery_count: 0,
        }
    }
}

struct Lease {
    message: Stored,
    hidden_until: Instant,
    /// Order in which leases were granted
    sequence: u64,
}

/// Provider whose queues live in this process.
///
/// Clones share the same queues.
#[derive(Clone)]
pub struct InMemoryProvider {
    broker: Arc<RwLock<Broker>>,
    leases_granted: Arc<AtomicU64>,
}

impl InMemoryProvider {
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            broker: Arc::new(RwLock::new(Broker::new(config))),
            leases_granted: Arc::new(AtomicU64::new(0)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Broker> {
        self.broker.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Broker> {
        self.broker.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of visible messages waiting in `queue`
    pub fn visible_count(&self, queue: &QueueName) -> usize {
        self.read().queues.get(queue).map_or(0, |q| q.visible.len())
    }

    /// Number of received but not yet deleted messages in `queue`
    pub fn in_flight_count(&self, queue: &QueueName) -> usize {
        self.read().queues.get(queue).map_or(0, |q| q.leased.len())
    }

    /// Bodies of all messages still held by `queue`, visible or in flight
    pub fn bodies(&self, queue: &QueueName) -> Vec<Bytes> {
        let broker = self.read();
        let Some(q) = broker.queues.get(queue) else {
            return Vec::new();
        };
        let mut leases: Vec<_> = q.leased.values().collect();
        leases.sort_by_key(|lease| lease.sequence);
        leases
            .into_iter()
            .map(|lease| &lease.message)
            .chain(q.visible.iter())
            .map(|stored| stored.body.clone())
            .collect()
    }

    /// Lease up to `max_messages` visible messages
    fn lease(&self, queue: &QueueName, max_messages: u32) -> Vec<ReceivedMessage> {
        let mut broker = self.write();
        let visibility = Duration::from_secs(broker.config.visibility_timeout_seconds);
        let state = broker.queue_mut(queue);
        state.expire_leases();

        let mut received = Vec::new();
        while received.len() < max_messages as usize {
            let Some(mut stored) = state.visible.pop_front() else {
                break;
            };
            stored.delivery_count += 1;

            let receipt = uuid::Uuid::new_v4().to_string();
            let sequence = self.leases_granted.fetch_add(1, Ordering::Relaxed);

            received.push(ReceivedMessage {
                message_id: stored.message_id.clone(),
                body: stored.body.clone(),
                attributes: stored
                    .group_id
                    .iter()
                    .map(|group| (GROUP_ID_ATTRIBUTE.to_string(), group.clone()))
                    .collect(),
                receipt_handle: ReceiptHandle::new(
                    receipt.clone(),
                    queue.clone(),
                    ProviderType::InMemory,
                ),
                delivery_count: stored.delivery_count,
                received_at: Utc::now(),
            });

            state.leased.insert(
                receipt,
                Lease {
                    message: stored,
                    hidden_until: Instant::now() + visibility,
                    sequence,
                },
            );
        }

        received
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

#[async_trait]
impl QueueProvider for InMemoryProvider {
    async fn send_message(
        &self,
        queue: &QueueName,
        message: &Message,
    ) -> Result<MessageId, QueueError> {
        let limit = ProviderType::InMemory.max_message_size();
        if message.body.len() > limit {
            return Err(QueueError::MessageTooLarge {
                size: message.body.len(),
                limit,
            });
        }

        let mut broker = self.write();
        let capacity = broker.config.max_queue_size;
        let state = broker.queue_mut(queue);

        if state.len() >= capacity {
            return Err(QueueError::QueueFull {
                queue: queue.to_string(),
                capacity,
            });
        }

        let message_id = MessageId::new();
        state
            .visible
            .push_back(Stored::new(message, message_id.clone()));

        Ok(message_id)
    }

    async fn receive_messages(
        &self,
        queue: &QueueName,
        max_messages: u32,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let deadline = Instant::now() + wait;

        loop {
            let received = self.lease(queue, max_messages);
            if !received.is_empty() || max_messages == 0 {
                return Ok(received);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(received);
            }

            tokio::time::sleep(RECEIVE_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn complete_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        let mut broker = self.write();
        broker.queue_mut(receipt.queue()).end_lease(receipt)?;
        Ok(())
    }

    async fn abandon_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        let mut broker = self.write();
        let state = broker.queue_mut(receipt.queue());
        let lease = state.end_lease(receipt)?;
        state.visible.push_front(lease.message);
        Ok(())
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }

    fn max_batch_size(&self) -> u32 {
        ProviderType::InMemory.max_receive_batch()
    }
}
