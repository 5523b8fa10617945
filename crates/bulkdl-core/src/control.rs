//! Run control: the shared cancellation token and the cancel/cleanup coordinator.
//!
//! The engine owns one `CancelToken` per run. The admission loop checks it
//! before and after every slot acquisition and each unit checks it before
//! starting network I/O. An interrupt handler drives `CancelCoordinator::shutdown`,
//! which stops admission, waits for admitted units to settle and removes the
//! files the run produced.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::scheduler::SettleLatch;
use crate::storage::OutputLedger;

/// Set-once cancellation flag shared by the admission loop, the units and
/// whoever handles interrupts. Never reset.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Returns true only for the call that actually set the flag.
    pub fn cancel(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// What a cancel-triggered shutdown did.
#[derive(Debug, Default)]
pub struct CleanupReport {
    /// All admitted units settled within the grace period.
    pub settled: bool,
    /// Cleanup ran (disabled by `cleanup_on_cancel = false`).
    pub cleanup_enabled: bool,
    /// Files removed from the save directory.
    pub removed: usize,
    /// Files that could not be removed.
    pub failed: Vec<(PathBuf, io::Error)>,
}

/// Handle for cancelling a run from another thread (e.g. a Ctrl-C handler).
/// Cheap to clone; obtained from `Engine::coordinator`.
#[derive(Clone)]
pub struct CancelCoordinator {
    token: CancelToken,
    latch: Arc<SettleLatch>,
    ledger: Arc<OutputLedger>,
    cleanup_on_cancel: bool,
    grace: Duration,
}

impl CancelCoordinator {
    pub(crate) fn new(
        token: CancelToken,
        latch: Arc<SettleLatch>,
        ledger: Arc<OutputLedger>,
        cleanup_on_cancel: bool,
        grace: Duration,
    ) -> Self {
        Self {
            token,
            latch,
            ledger,
            cleanup_on_cancel,
            grace,
        }
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    /// Stop admitting new units. In-flight units finish or fail on their own.
    pub fn cancel(&self) -> bool {
        let first = self.token.cancel();
        if first {
            tracing::info!("cancellation requested");
        }
        first
    }

    /// Cancel, wait (bounded by the grace period) for admitted units to settle,
    /// then remove this run's files when cleanup is enabled. Blocks the caller.
    ///
    /// A unit still in flight when the grace period expires may finalize its file
    /// afterwards; such files are not removed and the report has `settled == false`.
    pub fn shutdown(&self) -> CleanupReport {
        self.cancel();
        let settled = self.latch.wait_timeout(self.grace);
        if !settled {
            tracing::warn!(
                pending = self.latch.pending(),
                grace_secs = self.grace.as_secs(),
                "units still in flight after grace period; cleaning up anyway"
            );
        }

        let mut report = CleanupReport {
            settled,
            cleanup_enabled: self.cleanup_on_cancel,
            ..CleanupReport::default()
        };
        if !self.cleanup_on_cancel {
            return report;
        }

        let removal = self.ledger.remove_all();
        for (path, e) in &removal.failed {
            tracing::warn!(path = %path.display(), "cleanup could not remove file: {}", e);
        }
        tracing::info!(removed = removal.removed, "cleanup after cancellation finished");
        report.removed = removal.removed;
        report.failed = removal.failed;
        report
    }
}
