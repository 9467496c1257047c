//! Cooperative stop flag shared between the coordinator and a stage.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[cfg(test)]
#[path = "run_state_tests.rs"]
mod tests;

/// Per-stage `continue running` flag.
///
/// Written by the coordinator to request a stop, or by the stage itself when
/// it terminates on its own. Stages check it at loop boundaries and can wait
/// on [`RunState::stopped`] while backing off.
#[derive(Debug, Clone)]
pub struct RunState {
    running: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunState {
    /// Create a flag in the running state
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn should_continue(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Ask the stage to stop at its next loop boundary
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Resolve once a stop has been requested
    pub async fn stopped(&self) {
        loop {
            let notified = self.notify.notified();
            if !self.should_continue() {
                return;
            }
            notified.await;
        }
    }

    /// Sleep for `delay` unless a stop is requested first.
    ///
    /// Returns `false` when interrupted by a stop request.
    pub async fn sleep(&self, delay: std::time::Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => self.should_continue(),
            _ = self.stopped() => false,
        }
    }
}
