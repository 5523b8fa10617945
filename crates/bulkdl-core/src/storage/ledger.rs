//! Record of the files a run touched, for cleanup after cancellation.

use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use super::temp_path;

/// Outcome of removing a run's files.
#[derive(Debug, Default)]
pub struct RemovalReport {
    pub removed: usize,
    pub failed: Vec<(PathBuf, io::Error)>,
}

/// Destinations of admitted units and which of them were finalized.
/// Shared by every task of one run.
#[derive(Debug, Default)]
pub struct OutputLedger {
    admitted: Mutex<Vec<PathBuf>>,
    finalized: Mutex<Vec<PathBuf>>,
}

impl OutputLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note that a unit writing to `final_path` was admitted.
    pub fn track_admitted(&self, final_path: PathBuf) {
        self.admitted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(final_path);
    }

    /// Note that `final_path` was fully written by this run.
    pub fn track_finalized(&self, final_path: PathBuf) {
        self.finalized
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(final_path);
    }

    pub fn finalized(&self) -> Vec<PathBuf> {
        self.finalized
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Delete every finalized file and every leftover temp file of an admitted
    /// unit. Files this run never produced are not touched.
    pub fn remove_all(&self) -> RemovalReport {
        let mut report = RemovalReport::default();
        let mut targets = self.finalized();
        targets.extend(
            self.admitted
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .iter()
                .map(|p| temp_path(p)),
        );
        for path in targets {
            match std::fs::remove_file(&path) {
                Ok(()) => report.removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => report.failed.push((path, e)),
            }
        }
        report
    }
}
