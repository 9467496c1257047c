//! # Relay Buffer
//!
//! Bounded FIFO handoff between the fetch and forward stages.
//!
//! The buffer is split into a [`RelaySender`] and a [`RelayReceiver`], both
//! cloneable, so any number of producers and consumers can share it:
//!
//! - `put` waits while the buffer is full and fails once every receiver is gone
//! - `get` waits up to a timeout and reports `Closed` once every sender is
//!   gone and the buffer is empty
//!
//! Dropping the last sender is how the fetch stage tells the forward stage
//! that nothing more will arrive.

use crate::error::MoverError;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

#[cfg(test)]
#[path = "relay_tests.rs"]
mod tests;

/// Default number of messages the buffer holds
pub const DEFAULT_CAPACITY: usize = 100;

/// Errors returned by [`RelayReceiver::get`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("No message arrived within {0:?}")]
    Timeout(Duration),

    #[error("Relay buffer is closed and drained")]
    Closed,
}

/// Returned by [`RelaySender::put`] when no receiver is left; carries the
/// item back so the caller can dispose of it.
#[derive(Debug, Error)]
#[error("Relay buffer is closed")]
pub struct RelayClosed<T>(pub T);

/// Create a relay buffer holding at most `capacity` items.
///
/// # Errors
///
/// Returns `InvalidConfiguration` if `capacity` is zero.
pub fn bounded<T>(capacity: usize) -> Result<(RelaySender<T>, RelayReceiver<T>), MoverError> {
    if capacity == 0 {
        return Err(MoverError::invalid_configuration(
            "buffer_capacity",
            "must be greater than zero",
        ));
    }

    let (sender, receiver) = mpsc::channel(capacity);
    Ok((
        RelaySender { inner: sender },
        RelayReceiver {
            inner: Arc::new(Mutex::new(receiver)),
        },
    ))
}

/// Producer half of the relay buffer
#[derive(Debug)]
pub struct RelaySender<T> {
    inner: mpsc::Sender<T>,
}

impl<T> Clone for RelaySender<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> RelaySender<T> {
    /// Append `item`, waiting while the buffer is full
    pub async fn put(&self, item: T) -> Result<(), RelayClosed<T>> {
        self.inner
            .send(item)
            .await
            .map_err(|mpsc::error::SendError(item)| RelayClosed(item))
    }
}

#[cfg(test)]
impl<T> RelaySender<T> {
    /// Number of items currently buffered
    pub fn len(&self) -> usize {
        self.inner.max_capacity() - self.inner.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of buffered items
    pub fn capacity(&self) -> usize {
        self.inner.max_capacity()
    }

    /// True once every receiver has been dropped
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

/// Consumer half of the relay buffer
#[derive(Debug)]
pub struct RelayReceiver<T> {
    inner: Arc<Mutex<mpsc::Receiver<T>>>,
}

impl<T> Clone for RelayReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> RelayReceiver<T> {
    /// Take the oldest item, waiting at most `timeout` for one to arrive.
    ///
    /// Time spent waiting behind other consumers counts against `timeout`.
    pub async fn get(&self, timeout: Duration) -> Result<T, RelayError> {
        let received = tokio::time::timeout(timeout, async {
            let mut receiver = self.inner.lock().await;
            receiver.recv().await
        })
        .await;

        match received {
            Ok(Some(item)) => Ok(item),
            Ok(None) => Err(RelayError::Closed),
            Err(_) => Err(RelayError::Timeout(timeout)),
        }
    }

    /// Take the oldest item if one is buffered right now
    pub async fn try_get(&self) -> Option<T> {
        let mut receiver = self.inner.lock().await;
        receiver.try_recv().ok()
    }
}
