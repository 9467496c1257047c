//! # Queue-Mover Runtime
//!
//! Queue provider runtime used by Queue-Mover to talk to message queues.
//!
//! This library provides:
//! - A provider-agnostic [`QueueProvider`] trait (receive, send, delete, release)
//! - A [`QueueClient`] bound to a single queue, injected into each pipeline stage
//! - An AWS SQS provider speaking the SQS query API over HTTP
//! - An in-memory provider with visibility timeouts for tests and smoke runs
//!
//! ## Module Organization
//!
//! - [`error`] - Failures of queue operations and whether to retry them
//! - [`message`] - Queue names, messages and receipt handles
//! - [`provider`] - Provider types and configuration
//! - [`client`] - Provider trait, per-queue client and provider factory
//! - [`providers`] - Concrete provider implementations

pub mod client;
pub mod error;
pub mod message;
pub mod provider;
pub mod providers;

pub use client::{ProviderFactory, QueueClient, QueueProvider};
pub use error::{ConfigurationError, QueueError, SerializationError, ValidationError};
pub use message::{
    Message, MessageId, QueueName, ReceiptHandle, ReceivedMessage, GROUP_ID_ATTRIBUTE,
};
pub use provider::{AwsSqsConfig, InMemoryConfig, ProviderConfig, ProviderType};
pub use providers::{AwsSqsProvider, InMemoryProvider};
