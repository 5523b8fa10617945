//! Outcome of one run.

use std::fmt;

/// A unit whose fetch or write failed. Not retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFailure {
    pub index: usize,
    pub error: String,
}

/// Summary returned by `Engine::run`. Units never admitted (because of
/// cancellation) have no entry anywhere.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunResult {
    /// Units requested (`count`).
    pub requested: usize,
    /// Units that received a throttle slot and were started.
    pub admitted: usize,
    /// Units written successfully.
    pub completed: usize,
    /// Admitted units that saw the cancel token before any network I/O.
    pub skipped: usize,
    /// Failed units, ordered by index.
    pub failures: Vec<UnitFailure>,
    /// Cancellation was requested during the run.
    pub cancelled: bool,
    /// Every admitted unit settled before the settle timeout.
    pub settled: bool,
}

impl RunResult {
    pub fn all_succeeded(&self) -> bool {
        !self.cancelled && self.failures.is_empty() && self.completed == self.requested
    }
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} downloaded", self.completed, self.requested)?;
        if !self.failures.is_empty() {
            write!(f, ", {} failed", self.failures.len())?;
        }
        if self.cancelled {
            write!(f, ", cancelled after {} admitted", self.admitted)?;
        }
        if !self.settled {
            write!(f, " (some transfers still in flight)")?;
        }
        Ok(())
    }
}
