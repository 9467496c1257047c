//! # Queue-Mover Core
//!
//! Two-stage relay pipeline that moves messages from a source queue to a
//! destination queue, deleting each source message only after it has been
//! sent downstream.
//!
//! ## Architecture
//!
//! ```text
//! source queue --> FetchStage --> relay buffer --> ForwardStage --> destination queue
//!                                                       |
//!                                                       +--> delete from source
//! ```
//!
//! - [`FetchStage`] pulls batches into a bounded [`relay`] buffer, honouring
//!   an optional message budget
//! - [`ForwardStage`] sends, then deletes, parking messages it cannot send;
//!   it exits after an idle threshold and fails once the destination keeps
//!   rejecting sends
//! - [`Coordinator`] runs both as tokio tasks, watches their liveness and
//!   shuts them down in order
//!
//! Queue clients are injected; the pipeline works with any
//! [`QueueProvider`](queue_mover_runtime::QueueProvider).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use queue_mover_core::{Coordinator, MoverConfig};
//! use queue_mover_runtime::{InMemoryProvider, QueueClient, QueueName, QueueProvider};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider: Arc<dyn QueueProvider> = Arc::new(InMemoryProvider::default());
//! let source = QueueClient::new(provider.clone(), QueueName::new("orders".to_string())?);
//! let destination = QueueClient::new(provider, QueueName::new("orders-v2".to_string())?);
//!
//! let report = Coordinator::new(source, destination, MoverConfig::default())?
//!     .run()
//!     .await?;
//! println!("{}", report);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod fetch;
pub mod forward;
pub mod relay;
pub mod report;
pub mod retry;
pub mod run_state;

#[cfg(test)]
mod test_support;

pub use config::{MoverConfig, RetrySettings};
pub use coordinator::Coordinator;
pub use error::{MoverError, Stage};
pub use fetch::FetchStage;
pub use forward::ForwardStage;
pub use relay::{RelayClosed, RelayError, RelayReceiver, RelaySender};
pub use report::{
    FetchOutcome, FetchReport, ForwardOutcome, ForwardReport, MoveReport, ShutdownTrigger,
};
pub use retry::{RetryPolicy, RetryState};
pub use run_state::RunState;
