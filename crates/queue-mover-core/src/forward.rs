//! # Forward Stage
//!
//! Takes messages from the relay buffer, sends each body to the destination
//! queue and deletes the source copy only after the send succeeded.
//!
//! ## Failure Handling
//!
//! - A failed send never deletes. Transient failures are retried with backoff;
//!   once retries run out or a stop is requested the message is parked:
//!   released on the source so it is redelivered.
//! - A permanent send failure parks the message and then fails the stage, as
//!   does a run of `max_consecutive_parks` parked messages with no successful
//!   forward in between. A destination that rejects every send would
//!   otherwise cycle the same messages forever.
//! - A failed delete after a successful send is retried; if it keeps failing
//!   the message is counted as a possible duplicate and the stage moves on.
//!
//! ## Termination
//!
//! The stage exits when the idle clock (time spent waiting on an empty buffer
//! since the last message was handled) reaches
//! the idle threshold, when the buffer is closed and drained, or when the
//! stop flag is observed at the top of the loop. On stop, messages still
//! buffered are released on the source rather than forwarded.

use crate::config::MoverConfig;
use crate::error::{MoverError, Stage};
use crate::relay::{RelayError, RelayReceiver};
use crate::report::{ForwardOutcome, ForwardReport};
use crate::retry::{RetryPolicy, RetryState};
use crate::run_state::RunState;
use queue_mover_runtime::{QueueClient, QueueError, ReceivedMessage};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[cfg(test)]
#[path = "forward_tests.rs"]
mod tests;

/// What happened to a single dequeued message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Forwarded,
    ForwardedNotDeleted,
    Parked,
}

/// Forward stage state
pub struct ForwardStage {
    source: QueueClient,
    destination: QueueClient,
    relay: RelayReceiver<ReceivedMessage>,
    run_state: RunState,
    poll_interval: Duration,
    idle_timeout: Duration,
    retry_policy: RetryPolicy,
    max_consecutive_parks: u32,
}

impl ForwardStage {
    pub fn new(
        source: QueueClient,
        destination: QueueClient,
        relay: RelayReceiver<ReceivedMessage>,
        run_state: RunState,
        config: &MoverConfig,
    ) -> Self {
        Self {
            source,
            destination,
            relay,
            run_state,
            poll_interval: config.poll_interval(),
            idle_timeout: config.idle_timeout(),
            retry_policy: RetryPolicy::from(&config.retry),
            max_consecutive_parks: config.max_consecutive_parks,
        }
    }

    /// Run until idle, drained, or stopped.
    ///
    /// # Errors
    ///
    /// Returns `StageFailed` when the destination rejects a send permanently
    /// or too many messages in a row had to be parked. Buffered messages are
    /// released on the source first.
    pub async fn run(self) -> Result<ForwardReport, MoverError> {
        let mut report = ForwardReport::new();
        let mut last_handled = Instant::now();
        let mut consecutive_parks = 0;
        let mut failure = None;

        info!(
            source = %self.source.queue(),
            destination = %self.destination.queue(),
            idle_timeout_secs = self.idle_timeout.as_secs(),
            "Forward stage started"
        );

        loop {
            if !self.run_state.should_continue() {
                report.released += self.release_buffered().await;
                report.outcome = ForwardOutcome::Stopped;
                break;
            }

            // Never wait past the idle threshold
            let idle = last_handled.elapsed();
            let wait = self
                .poll_interval
                .min(self.idle_timeout.saturating_sub(idle));

            match self.relay.get(wait).await {
                Ok(message) => {
                    let disposition = self.forward(message).await;
                    // Sending and retrying is not idle time
                    last_handled = Instant::now();

                    match disposition {
                        Ok(Disposition::Forwarded) => {
                            report.forwarded += 1;
                            consecutive_parks = 0;
                        }
                        Ok(Disposition::ForwardedNotDeleted) => {
                            report.forwarded += 1;
                            report.delete_failures += 1;
                            consecutive_parks = 0;
                        }
                        Ok(Disposition::Parked) => {
                            report.parked += 1;
                            consecutive_parks += 1;
                            if consecutive_parks >= self.max_consecutive_parks
                                && self.run_state.should_continue()
                            {
                                failure = Some(format!(
                                    "{} consecutive message(s) could not be sent to '{}'",
                                    consecutive_parks,
                                    self.destination.queue()
                                ));
                                break;
                            }
                        }
                        Err(e) => {
                            report.parked += 1;
                            failure = Some(format!(
                                "send to '{}' failed permanently: {}",
                                self.destination.queue(),
                                e
                            ));
                            break;
                        }
                    }
                }
                Err(RelayError::Timeout(_)) => {
                    let idle = last_handled.elapsed();
                    debug!(idle_ms = idle.as_millis() as u64, "No message in relay buffer");
                    if idle >= self.idle_timeout {
                        info!(
                            idle_secs = idle.as_secs_f64(),
                            "Idle threshold reached, stopping forward stage"
                        );
                        report.outcome = ForwardOutcome::IdleTimeout;
                        break;
                    }
                }
                Err(RelayError::Closed) => {
                    report.outcome = ForwardOutcome::RelayDrained;
                    break;
                }
            }
        }

        if let Some(message) = failure {
            report.released += self.release_buffered().await;
            self.run_state.stop();
            error!(
                forwarded = report.forwarded,
                parked = report.parked,
                released = report.released,
                error = %message,
                "Forward stage failed"
            );
            return Err(MoverError::StageFailed {
                stage: Stage::Forward,
                message,
            });
        }

        self.run_state.stop();

        info!(
            forwarded = report.forwarded,
            parked = report.parked,
            released = report.released,
            delete_failures = report.delete_failures,
            outcome = ?report.outcome,
            "Forward stage finished"
        );

        Ok(report)
    }

    /// Send one message and delete its source copy.
    ///
    /// A permanent send failure is returned after the message is parked.
    async fn forward(&self, message: ReceivedMessage) -> Result<Disposition, QueueError> {
        if let Err(e) = self.send_with_retry(&message).await {
            error!(
                message_id = %message.message_id,
                error = %e,
                "Send failed, parking message on the source"
            );
            self.park(&message).await;
            return if e.is_transient() {
                Ok(Disposition::Parked)
            } else {
                Err(e)
            };
        }

        match self.delete_with_retry(&message).await {
            Ok(()) => {
                debug!(message_id = %message.message_id, "Message forwarded");
                Ok(Disposition::Forwarded)
            }
            Err(e) => {
                warn!(
                    message_id = %message.message_id,
                    error = %e,
                    "Message forwarded but not deleted from the source; it may be delivered again"
                );
                Ok(Disposition::ForwardedNotDeleted)
            }
        }
    }

    async fn send_with_retry(&self, message: &ReceivedMessage) -> Result<(), QueueError> {
        let body = message.message();
        let mut retry = self.retry_policy.begin();

        loop {
            let e = match self.destination.send(&body).await {
                Ok(destination_id) => {
                    debug!(
                        message_id = %message.message_id,
                        destination_id = %destination_id,
                        attempts = retry.attempts(),
                        "Message sent"
                    );
                    return Ok(());
                }
                Err(e) => e,
            };

            let Some(delay) = self.retry_delay(&mut retry, &e) else {
                return Err(e);
            };
            warn!(
                message_id = %message.message_id,
                next_attempt = retry.attempts(),
                delay_ms = delay.as_millis() as u64,
                error = %e,
                "Send failed, retrying"
            );
            if !self.run_state.sleep(delay).await {
                return Err(e);
            }
        }
    }

    async fn delete_with_retry(&self, message: &ReceivedMessage) -> Result<(), QueueError> {
        let mut retry = self.retry_policy.begin();

        loop {
            let e = match self.source.delete(&message.receipt_handle).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            let Some(delay) = self.retry_delay(&mut retry, &e) else {
                return Err(e);
            };
            warn!(
                message_id = %message.message_id,
                next_attempt = retry.attempts(),
                error = %e,
                "Delete failed, retrying"
            );
            if !self.run_state.sleep(delay).await {
                return Err(e);
            }
        }
    }

    /// Wait before retrying `error`, or `None` when it should not be retried
    fn retry_delay(&self, retry: &mut RetryState<'_>, error: &QueueError) -> Option<Duration> {
        if error.is_transient() {
            retry.next_delay(error.retry_after())
        } else {
            None
        }
    }

    /// Make a message visible on the source again
    async fn park(&self, message: &ReceivedMessage) {
        if let Err(e) = self.source.release(&message.receipt_handle).await {
            warn!(
                message_id = %message.message_id,
                error = %e,
                "Failed to release message; it reappears after its visibility timeout"
            );
        }
    }

    /// Release every message still buffered
    async fn release_buffered(&self) -> u64 {
        let mut released = 0;
        while let Some(message) = self.relay.try_get().await {
            self.park(&message).await;
            released += 1;
        }
        if released > 0 {
            info!(released, "Returned buffered messages to the source");
        }
        released
    }
}
