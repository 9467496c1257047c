//! Counters and outcomes reported by the stages and the coordinator.

use serde::Serialize;
use std::fmt;
use std::time::Duration;

#[cfg(test)]
#[path = "report_tests.rs"]
mod tests;

/// Why the fetch stage stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchOutcome {
    /// The coordinator asked it to stop
    Stopped,
    /// The message budget reached zero
    BudgetExhausted,
    /// The forward stage went away and the buffer no longer accepts messages
    RelayClosed,
}

/// Result of a fetch stage run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchReport {
    /// Messages received from the source
    pub fetched: u64,
    /// Messages handed back to the source because the buffer was closed
    pub released: u64,
    pub outcome: FetchOutcome,
}

impl FetchReport {
    pub(crate) fn new() -> Self {
        Self {
            fetched: 0,
            released: 0,
            outcome: FetchOutcome::Stopped,
        }
    }
}

/// Why the forward stage stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ForwardOutcome {
    /// The coordinator asked it to stop
    Stopped,
    /// Nothing was dequeued for the idle threshold
    IdleTimeout,
    /// The fetch stage exited and the buffer is empty
    RelayDrained,
}

/// Result of a forward stage run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForwardReport {
    /// Messages sent to the destination
    pub forwarded: u64,
    /// Messages whose send failed and were returned to the source
    pub parked: u64,
    /// Buffered messages returned to the source unsent on stop
    pub released: u64,
    /// Sent messages whose source copy could not be deleted; these may be
    /// delivered again
    pub delete_failures: u64,
    pub outcome: ForwardOutcome,
}

impl ForwardReport {
    pub(crate) fn new() -> Self {
        Self {
            forwarded: 0,
            parked: 0,
            released: 0,
            delete_failures: 0,
            outcome: ForwardOutcome::Stopped,
        }
    }
}

/// What made the coordinator begin shutting down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownTrigger {
    FetchFinished,
    ForwardFinished,
    Interrupted,
}

impl fmt::Display for ShutdownTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FetchFinished => write!(f, "fetch stage finished"),
            Self::ForwardFinished => write!(f, "forward stage finished"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Summary of a completed move
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MoveReport {
    pub trigger: ShutdownTrigger,
    pub fetch: FetchReport,
    pub forward: ForwardReport,
    pub elapsed: Duration,
}

impl MoveReport {
    pub fn fetched(&self) -> u64 {
        self.fetch.fetched
    }

    pub fn forwarded(&self) -> u64 {
        self.forward.forwarded
    }

    /// Messages returned to the source without being forwarded
    pub fn returned_to_source(&self) -> u64 {
        self.fetch.released + self.forward.parked + self.forward.released
    }

    pub fn was_interrupted(&self) -> bool {
        self.trigger == ShutdownTrigger::Interrupted
    }
}

impl fmt::Display for MoveReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Move finished ({}) after {:.1?}", self.trigger, self.elapsed)?;
        writeln!(f, "  fetched:         {}", self.fetch.fetched)?;
        writeln!(f, "  forwarded:       {}", self.forward.forwarded)?;
        writeln!(f, "  parked:          {}", self.forward.parked)?;
        writeln!(
            f,
            "  released:        {}",
            self.fetch.released + self.forward.released
        )?;
        write!(f, "  delete failures: {}", self.forward.delete_failures)
    }
}
