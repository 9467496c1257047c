//! # Coordinator
//!
//! Wires the fetch and forward stages together through a relay buffer, runs
//! them as independent tokio tasks and shuts them down in order.
//!
//! ## Shutdown Sequence
//!
//! Shutdown starts when either stage finishes on its own or the interrupt
//! future resolves:
//!
//! 1. Stop the fetch stage and wait for it. Its exit closes the buffer.
//! 2. Wait for the forward stage to forward what is still buffered and exit.
//!    After an interrupt this wait is bounded by the shutdown timeout; past it
//!    the forward stage is stopped and returns the rest to the source.
//!
//! If the forward stage exits first, the fetch stage's next put fails and it
//! returns its undelivered messages to the source before exiting.

use crate::config::MoverConfig;
use crate::error::{MoverError, Stage};
use crate::fetch::FetchStage;
use crate::forward::ForwardStage;
use crate::relay;
use crate::report::{FetchReport, ForwardReport, MoveReport, ShutdownTrigger};
use crate::run_state::RunState;
use queue_mover_runtime::QueueClient;
use std::future::Future;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;

/// Moves messages from a source queue to a destination queue
#[derive(Debug)]
pub struct Coordinator {
    source: QueueClient,
    destination: QueueClient,
    config: MoverConfig,
}

impl Coordinator {
    /// Create a coordinator for a move from `source` to `destination`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` if `config` does not validate.
    pub fn new(
        source: QueueClient,
        destination: QueueClient,
        config: MoverConfig,
    ) -> Result<Self, MoverError> {
        config.validate()?;
        Ok(Self {
            source,
            destination,
            config,
        })
    }

    /// Run until completion or until the process receives Ctrl-C or SIGTERM
    pub async fn run(self) -> Result<MoveReport, MoverError> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until completion or until `interrupt` resolves.
    ///
    /// An interrupt is a normal way to end a run and is reported through
    /// [`MoveReport::trigger`], not as an error.
    ///
    /// # Errors
    ///
    /// Returns `StageFailed` if the fetch stage gave up on the source queue or
    /// the forward stage gave up on the destination, and `StageAborted` if
    /// either stage panicked. The sibling stage is shut
    /// down before the error is returned.
    pub async fn run_until<F>(self, interrupt: F) -> Result<MoveReport, MoverError>
    where
        F: Future<Output = ()>,
    {
        let started = Instant::now();
        let (sender, receiver) = relay::bounded(self.config.buffer_capacity)?;
        let fetch_state = RunState::new();
        let forward_state = RunState::new();

        info!(
            source = %self.source.queue(),
            destination = %self.destination.queue(),
            buffer_capacity = self.config.buffer_capacity,
            max_messages = ?self.config.max_messages,
            "Starting queue move"
        );

        let fetch = FetchStage::new(
            self.source.clone(),
            sender,
            fetch_state.clone(),
            &self.config,
        );
        let forward = ForwardStage::new(
            self.source.clone(),
            self.destination.clone(),
            receiver,
            forward_state.clone(),
            &self.config,
        );

        let mut fetch_task = tokio::spawn(fetch.run());
        let mut forward_task = tokio::spawn(forward.run());

        let trigger = self
            .wait_for_trigger(&fetch_task, &forward_task, interrupt)
            .await;
        info!(trigger = %trigger, "Shutting down pipeline");

        fetch_state.stop();
        let fetch_result = (&mut fetch_task).await;

        let forward_result = if trigger == ShutdownTrigger::Interrupted {
            let grace = self.config.shutdown_timeout();
            match tokio::time::timeout(grace, &mut forward_task).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        grace_secs = grace.as_secs(),
                        "Forward stage still draining after grace period, stopping it"
                    );
                    forward_state.stop();
                    forward_task.await
                }
            }
        } else {
            forward_task.await
        };

        let (fetch, fetch_error) = collect_fetch(fetch_result);
        let (forward, forward_error) = collect_forward(forward_result);

        let report = MoveReport {
            trigger,
            fetch,
            forward,
            elapsed: started.elapsed(),
        };

        info!(
            trigger = %report.trigger,
            fetched = report.fetch.fetched,
            forwarded = report.forward.forwarded,
            parked = report.forward.parked,
            released = report.fetch.released + report.forward.released,
            delete_failures = report.forward.delete_failures,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Queue move finished"
        );

        match fetch_error.or(forward_error) {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Poll stage liveness until one stage exits or the interrupt fires
    async fn wait_for_trigger<F>(
        &self,
        fetch_task: &JoinHandle<Result<FetchReport, MoverError>>,
        forward_task: &JoinHandle<Result<ForwardReport, MoverError>>,
        interrupt: F,
    ) -> ShutdownTrigger
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(interrupt);
        let mut liveness = tokio::time::interval(self.config.liveness_interval());
        liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut interrupt => {
                    info!("Interrupt received");
                    return ShutdownTrigger::Interrupted;
                }
                _ = liveness.tick() => {
                    if fetch_task.is_finished() {
                        return ShutdownTrigger::FetchFinished;
                    }
                    if forward_task.is_finished() {
                        return ShutdownTrigger::ForwardFinished;
                    }
                }
            }
        }
    }
}

fn collect_fetch(
    result: Result<Result<FetchReport, MoverError>, JoinError>,
) -> (FetchReport, Option<MoverError>) {
    match result {
        Ok(Ok(report)) => (report, None),
        Ok(Err(e)) => (FetchReport::new(), Some(stage_failed(Stage::Fetch, e))),
        Err(join_error) => (FetchReport::new(), Some(aborted(Stage::Fetch, join_error))),
    }
}

fn collect_forward(
    result: Result<Result<ForwardReport, MoverError>, JoinError>,
) -> (ForwardReport, Option<MoverError>) {
    match result {
        Ok(Ok(report)) => (report, None),
        Ok(Err(e)) => (ForwardReport::new(), Some(stage_failed(Stage::Forward, e))),
        Err(join_error) => (
            ForwardReport::new(),
            Some(aborted(Stage::Forward, join_error)),
        ),
    }
}

fn stage_failed(stage: Stage, e: MoverError) -> MoverError {
    error!(stage = %stage, error = %e, "Stage failed");
    match e {
        MoverError::StageFailed { .. } => e,
        other => MoverError::StageFailed {
            stage,
            message: other.to_string(),
        },
    }
}

fn aborted(stage: Stage, join_error: JoinError) -> MoverError {
    let message = if join_error.is_panic() {
        let payload = join_error.into_panic();
        payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "stage panicked".to_string())
    } else {
        join_error.to_string()
    };

    error!(stage = %stage, message = %message, "Stage terminated abnormally");
    MoverError::StageAborted { stage, message }
}

/// Resolve on Ctrl-C, or SIGTERM on unix.
///
/// A signal handler that cannot be installed never fires rather than ending
/// the run early.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C)"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
