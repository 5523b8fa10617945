//! Completion counter and progress reporting.
//!
//! Every successful unit bumps the counter and invokes the progress callback
//! while holding the same lock, so observers never see torn or out-of-order
//! values. The lock is never held across network I/O.

use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Receives a snapshot after every successful unit. Runs under the progress
/// lock: keep it short and never wait on the run from inside it.
pub type ProgressCallback = Arc<dyn Fn(&ProgressStats) + Send + Sync>;

/// Snapshot of run progress (CLI-friendly).
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressStats {
    /// Units completed successfully so far.
    pub completed: usize,
    /// Units requested.
    pub total: usize,
    /// Seconds since the run started.
    pub elapsed_secs: f64,
}

impl ProgressStats {
    /// Units completed per second (0 if elapsed is 0).
    pub fn units_per_sec(&self) -> f64 {
        if self.elapsed_secs <= 0.0 {
            return 0.0;
        }
        self.completed as f64 / self.elapsed_secs
    }

    /// Estimated seconds remaining (None if rate is 0, Some(0) when done).
    pub fn eta_secs(&self) -> Option<f64> {
        let remaining = self.total.saturating_sub(self.completed);
        if remaining == 0 {
            return Some(0.0);
        }
        let rate = self.units_per_sec();
        if rate <= 0.0 {
            return None;
        }
        Some(remaining as f64 / rate)
    }

    /// Fraction complete in [0.0, 1.0].
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        (self.completed as f64 / self.total as f64).min(1.0)
    }

    pub fn is_complete(&self) -> bool {
        self.completed >= self.total
    }
}

/// Shared completion counter for one run. `completed` only grows and never
/// passes `total`.
#[derive(Debug)]
pub struct ProgressState {
    total: usize,
    started: Instant,
    completed: Mutex<usize>,
}

impl ProgressState {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            started: Instant::now(),
            completed: Mutex::new(0),
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn completed(&self) -> usize {
        *self.completed.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> ProgressStats {
        self.stats(self.completed())
    }

    fn stats(&self, completed: usize) -> ProgressStats {
        ProgressStats {
            completed,
            total: self.total,
            elapsed_secs: self.started.elapsed().as_secs_f64(),
        }
    }

    /// Count one successful unit and report it to `on_progress` inside the
    /// same critical section.
    pub fn record_success(&self, on_progress: Option<&ProgressCallback>) -> ProgressStats {
        let mut completed = self.completed.lock().unwrap_or_else(|e| e.into_inner());
        if *completed < self.total {
            *completed += 1;
        } else {
            tracing::warn!(total = self.total, "completion recorded past total; ignored");
        }
        let stats = self.stats(*completed);
        if let Some(cb) = on_progress {
            cb(&stats);
        }
        stats
    }
}

/// Progress callback that forwards snapshots into a tokio channel. Uses
/// `try_send`, so a slow consumer sees coalesced updates rather than stalling units.
pub fn channel_callback(tx: tokio::sync::mpsc::Sender<ProgressStats>) -> ProgressCallback {
    Arc::new(move |stats: &ProgressStats| {
        let _ = tx.try_send(stats.clone());
    })
}
