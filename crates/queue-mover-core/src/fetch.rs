//! # Fetch Stage
//!
//! Pulls batches from the source queue and hands each message to the relay
//! buffer, one at a time so a full buffer throttles the receives.
//!
//! Each round requests `min(remaining budget, batch size)` messages and
//! decrements the budget by what actually arrived. The stage stops when:
//!
//! 1. The stop flag is observed at the top of a round
//! 2. The budget reaches zero after a round has been buffered
//! 3. The buffer rejects a message because the forward stage is gone
//!
//! Dropping the stage drops its relay sender, closing the buffer for the
//! forward stage once the buffered messages are consumed.

use crate::config::MoverConfig;
use crate::error::{MoverError, Stage};
use crate::relay::{RelayClosed, RelaySender};
use crate::report::{FetchOutcome, FetchReport};
use crate::retry::RetryPolicy;
use crate::run_state::RunState;
use queue_mover_runtime::{QueueClient, ReceivedMessage};
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[cfg(test)]
#[path = "fetch_tests.rs"]
mod tests;

/// Fetch stage state
pub struct FetchStage {
    source: QueueClient,
    relay: RelaySender<ReceivedMessage>,
    run_state: RunState,
    batch_size: u32,
    budget: Option<u64>,
    receive_wait: Duration,
    empty_backoff: Duration,
    retry_policy: RetryPolicy,
}

impl FetchStage {
    pub fn new(
        source: QueueClient,
        relay: RelaySender<ReceivedMessage>,
        run_state: RunState,
        config: &MoverConfig,
    ) -> Self {
        Self {
            source,
            relay,
            run_state,
            batch_size: config.batch_size,
            budget: config.max_messages,
            receive_wait: config.receive_wait(),
            empty_backoff: config.poll_interval(),
            retry_policy: RetryPolicy::from(&config.retry),
        }
    }

    /// Messages to request in the next round
    fn next_batch_size(&self) -> u32 {
        match self.budget {
            Some(remaining) => remaining.min(u64::from(self.batch_size)) as u32,
            None => self.batch_size,
        }
    }

    /// Run until stopped, out of budget, or cut off by the forward stage.
    ///
    /// # Errors
    ///
    /// Returns the receive error when it is not transient or keeps failing
    /// past the retry policy.
    pub async fn run(mut self) -> Result<FetchReport, MoverError> {
        let mut report = FetchReport::new();

        info!(
            queue = %self.source.queue(),
            batch_size = self.batch_size,
            budget = ?self.budget,
            "Fetch stage started"
        );

        let result = self.fetch_rounds(&mut report).await;
        self.run_state.stop();

        match &result {
            Ok(()) => info!(
                fetched = report.fetched,
                released = report.released,
                outcome = ?report.outcome,
                "Fetch stage finished"
            ),
            Err(e) => error!(
                fetched = report.fetched,
                error = %e,
                "Fetch stage failed"
            ),
        }

        result.map(|()| report)
    }

    async fn fetch_rounds(&mut self, report: &mut FetchReport) -> Result<(), MoverError> {
        if self.budget == Some(0) {
            report.outcome = FetchOutcome::BudgetExhausted;
            return Ok(());
        }

        loop {
            if !self.run_state.should_continue() {
                report.outcome = FetchOutcome::Stopped;
                return Ok(());
            }

            let count = self.next_batch_size();
            let Some(messages) = self.receive_with_retry(count).await? else {
                report.outcome = FetchOutcome::Stopped;
                return Ok(());
            };

            let received = messages.len() as u64;
            report.fetched += received;
            if let Some(remaining) = self.budget.as_mut() {
                *remaining = remaining.saturating_sub(received);
            }

            debug!(requested = count, received, budget = ?self.budget, "Fetched batch");

            if received == 0 && self.receive_wait.is_zero() {
                // Short polling returns at once; avoid spinning on an empty queue
                if !self.run_state.sleep(self.empty_backoff).await {
                    report.outcome = FetchOutcome::Stopped;
                    return Ok(());
                }
            }

            let mut pending = messages.into_iter();
            while let Some(message) = pending.next() {
                if let Err(RelayClosed(message)) = self.relay.put(message).await {
                    warn!(
                        undelivered = pending.len() + 1,
                        "Relay buffer closed, returning messages to the source"
                    );
                    report.released += self
                        .release_all(std::iter::once(message).chain(pending))
                        .await;
                    report.outcome = FetchOutcome::RelayClosed;
                    return Ok(());
                }
            }

            if self.budget == Some(0) {
                report.outcome = FetchOutcome::BudgetExhausted;
                return Ok(());
            }
        }
    }

    /// Receive one batch, retrying transient failures.
    ///
    /// Returns `None` when a stop is requested during a backoff.
    async fn receive_with_retry(
        &self,
        count: u32,
    ) -> Result<Option<Vec<ReceivedMessage>>, MoverError> {
        let mut retry = self.retry_policy.begin();

        loop {
            let e = match self.source.receive(count, self.receive_wait).await {
                Ok(messages) => return Ok(Some(messages)),
                Err(e) => e,
            };

            let delay = if e.is_transient() {
                retry.next_delay(e.retry_after())
            } else {
                None
            };
            let Some(delay) = delay else {
                error!(
                    queue = %self.source.queue(),
                    attempts = retry.attempts(),
                    transient = e.is_transient(),
                    error = %e,
                    "Receive failed permanently"
                );
                return Err(MoverError::StageFailed {
                    stage: Stage::Fetch,
                    message: format!(
                        "receive from '{}' failed after {} attempt(s): {}",
                        self.source.queue(),
                        retry.attempts(),
                        e
                    ),
                });
            };

            warn!(
                queue = %self.source.queue(),
                next_attempt = retry.attempts(),
                delay_ms = delay.as_millis() as u64,
                error = %e,
                "Receive failed, retrying"
            );
            if !self.run_state.sleep(delay).await {
                return Ok(None);
            }
        }
    }

    /// Return messages to the source so they become visible again
    async fn release_all(&self, messages: impl Iterator<Item = ReceivedMessage>) -> u64 {
        let mut released = 0;
        for message in messages {
            match self.source.release(&message.receipt_handle).await {
                Ok(()) => released += 1,
                Err(e) => warn!(
                    message_id = %message.message_id,
                    error = %e,
                    "Failed to release message; it reappears after its visibility timeout"
                ),
            }
        }
        released
    }
}
