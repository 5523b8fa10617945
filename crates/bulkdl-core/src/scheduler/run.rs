//! The download engine: admission loop plus one worker thread per admitted unit.

use anyhow::Result;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::{ConfigError, RunConfig};
use crate::control::{CancelCoordinator, CancelToken};
use crate::downloader::{Fetcher, TransferError};
use crate::storage::{self, OutputLedger};
use crate::url_model;

use super::latch::{SettleGuard, SettleLatch};
use super::progress::{ProgressCallback, ProgressState};
use super::result::{RunResult, UnitFailure};
use super::throttle::{Slot, Throttle};

/// One admitted unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTask {
    /// 1-based unit index.
    pub index: usize,
    pub url: String,
    pub destination: PathBuf,
}

/// State shared between the admission loop and every unit of one run.
struct RunShared {
    throttle: Arc<Throttle>,
    latch: Arc<SettleLatch>,
    ledger: Arc<OutputLedger>,
    progress: ProgressState,
    failures: Mutex<Vec<UnitFailure>>,
    skipped: AtomicUsize,
    cancel: CancelToken,
}

impl RunShared {
    fn record_failure(&self, index: usize, error: String) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(UnitFailure { index, error });
    }

    fn failures(&self) -> Vec<UnitFailure> {
        let mut failures = self
            .failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        failures.sort_by_key(|f| f.index);
        failures
    }
}

/// Runs `count` units with at most `max_concurrency` in flight.
///
/// All counters and flags are owned by the engine, so independent engines can
/// run side by side. An engine runs once.
pub struct Engine {
    config: RunConfig,
    fetcher: Arc<dyn Fetcher>,
    shared: Arc<RunShared>,
    started: AtomicBool,
}

impl Engine {
    /// Validate `config` and prepare a run. Nothing touches the network yet.
    pub fn new(config: RunConfig, fetcher: Arc<dyn Fetcher>) -> Result<Self, ConfigError> {
        Self::with_cancel_token(config, fetcher, CancelToken::new())
    }

    /// Like `new` but observes a caller-supplied cancel token.
    pub fn with_cancel_token(
        config: RunConfig,
        fetcher: Arc<dyn Fetcher>,
        cancel: CancelToken,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let shared = Arc::new(RunShared {
            throttle: Arc::new(Throttle::new(config.max_concurrency)),
            latch: Arc::new(SettleLatch::new()),
            ledger: Arc::new(OutputLedger::new()),
            progress: ProgressState::new(config.count),
            failures: Mutex::new(Vec::new()),
            skipped: AtomicUsize::new(0),
            cancel,
        });
        Ok(Self {
            config,
            fetcher,
            shared,
            started: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// The run's throttle (for instrumentation).
    pub fn throttle(&self) -> &Arc<Throttle> {
        &self.shared.throttle
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.shared.cancel
    }

    /// Handle for cancelling this run and cleaning up its files from another thread.
    pub fn coordinator(&self) -> CancelCoordinator {
        CancelCoordinator::new(
            self.shared.cancel.clone(),
            Arc::clone(&self.shared.latch),
            Arc::clone(&self.shared.ledger),
            self.config.cleanup_on_cancel,
            self.config.cleanup_grace(),
        )
    }

    /// Run the admission loop, then wait (bounded by `settle_timeout_secs`)
    /// for admitted units to settle. Blocks the calling thread.
    ///
    /// The save directory must already exist.
    pub fn run(&self, on_progress: Option<ProgressCallback>) -> Result<RunResult> {
        if self.started.swap(true, Ordering::SeqCst) {
            anyhow::bail!("engine already ran; create a new engine per run");
        }
        let cfg = &self.config;
        let shared = &self.shared;
        tracing::info!(
            count = cfg.count,
            max_concurrency = cfg.max_concurrency,
            url = %cfg.download_url,
            save_path = %cfg.save_path.display(),
            "run started"
        );

        // Held while admitting so a concurrent shutdown cannot clean up before
        // the loop has stopped.
        let admission = shared.latch.enter();
        let mut admitted = 0usize;
        for index in 1..=cfg.count {
            if shared.cancel.is_cancelled() {
                tracing::debug!(index, "cancelled; admission stopped");
                break;
            }
            let Some(slot) = shared.throttle.acquire(&shared.cancel) else {
                tracing::debug!(index, "cancelled while waiting for a slot");
                break;
            };
            if shared.cancel.is_cancelled() {
                drop(slot);
                tracing::debug!(index, "cancelled after slot grant; admission stopped");
                break;
            }

            let settle = shared.latch.enter();
            let task = TransferTask {
                index,
                url: url_model::render_url(&cfg.download_url, index),
                destination: storage::unit_path(&cfg.save_path, index, &cfg.file_extension),
            };
            shared.ledger.track_admitted(task.destination.clone());
            admitted += 1;
            tracing::debug!(index, url = %task.url, "unit admitted");
            self.spawn_unit(task, slot, settle, on_progress.clone());
        }
        drop(admission);

        let settled = shared.latch.wait_timeout(cfg.settle_timeout());
        if !settled {
            tracing::warn!(
                pending = shared.latch.pending(),
                timeout_secs = cfg.settle_timeout_secs,
                "settle timeout expired with units still in flight"
            );
        }

        let result = RunResult {
            requested: cfg.count,
            admitted,
            completed: shared.progress.completed(),
            skipped: shared.skipped.load(Ordering::Acquire),
            failures: shared.failures(),
            cancelled: shared.cancel.is_cancelled(),
            settled,
        };
        tracing::info!(
            admitted = result.admitted,
            completed = result.completed,
            failed = result.failures.len(),
            skipped = result.skipped,
            cancelled = result.cancelled,
            "run finished"
        );
        Ok(result)
    }

    fn spawn_unit(
        &self,
        task: TransferTask,
        slot: Slot,
        settle: SettleGuard,
        on_progress: Option<ProgressCallback>,
    ) {
        let shared = Arc::clone(&self.shared);
        let fetcher = Arc::clone(&self.fetcher);
        let index = task.index;
        let spawned = std::thread::Builder::new()
            .name(format!("bulkdl-unit-{}", index))
            .spawn(move || {
                run_unit(fetcher.as_ref(), &shared, &task, on_progress.as_ref());
                // Slot first, then settle: a settled unit holds nothing.
                drop(slot);
                drop(settle);
            });
        // A failed spawn drops the closure, which releases the slot and settles the unit.
        if let Err(e) = spawned {
            tracing::warn!(index, "could not spawn worker: {}", e);
            self.shared
                .record_failure(index, format!("could not spawn worker: {}", e));
        }
    }
}

fn run_unit(
    fetcher: &dyn Fetcher,
    shared: &RunShared,
    task: &TransferTask,
    on_progress: Option<&ProgressCallback>,
) {
    if shared.cancel.is_cancelled() {
        shared.skipped.fetch_add(1, Ordering::AcqRel);
        tracing::debug!(index = task.index, "cancelled before transfer; skipped");
        return;
    }

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        fetcher.fetch(&task.url, &task.destination)
    }))
    .unwrap_or_else(|payload| Err(TransferError::Panicked(panic_message(payload.as_ref()))));

    match outcome {
        Ok(bytes) => {
            shared.ledger.track_finalized(task.destination.clone());
            let stats = shared.progress.record_success(on_progress);
            tracing::debug!(
                index = task.index,
                bytes,
                completed = stats.completed,
                cancelled = shared.cancel.is_cancelled(),
                "unit completed"
            );
        }
        Err(e) => {
            tracing::warn!(index = task.index, "error downloading unit {}: {}", task.index, e);
            shared.record_failure(task.index, e.to_string());
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ProgressStats;
    use std::collections::BTreeSet;
    use std::path::Path;
    use std::time::Duration;

    fn test_config(save_path: &Path, count: usize, max_concurrency: usize) -> RunConfig {
        RunConfig {
            count,
            max_concurrency,
            download_url: "http://localhost/{index}".to_string(),
            save_path: save_path.to_path_buf(),
            file_extension: String::new(),
            settle_timeout_secs: 30,
            cleanup_grace_secs: 30,
            ..RunConfig::default()
        }
    }

    fn index_of(url: &str) -> usize {
        url.rsplit('/').next().unwrap().parse().unwrap()
    }

    /// Writes the URL as the body after `delay`; fails the listed indices.
    fn stub_fetcher(delay: Duration, failing: &[usize]) -> Arc<dyn Fetcher> {
        let failing: BTreeSet<usize> = failing.iter().copied().collect();
        Arc::new(move |url: &str, dest: &Path| -> Result<u64, TransferError> {
            std::thread::sleep(delay);
            if failing.contains(&index_of(url)) {
                return Err(TransferError::Http(500));
            }
            std::fs::write(dest, url.as_bytes()).map_err(TransferError::Storage)?;
            Ok(url.len() as u64)
        })
    }

    fn files_in(dir: &Path) -> BTreeSet<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    fn names(range: impl IntoIterator<Item = usize>) -> BTreeSet<String> {
        range.into_iter().map(|i| i.to_string()).collect()
    }

    #[test]
    fn five_units_two_slots_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(
            test_config(dir.path(), 5, 2),
            stub_fetcher(Duration::ZERO, &[]),
        )
        .unwrap();

        let result = engine.run(None).unwrap();

        assert_eq!(result.requested, 5);
        assert_eq!(result.admitted, 5);
        assert_eq!(result.completed, 5);
        assert!(result.failures.is_empty());
        assert!(result.settled);
        assert!(result.all_succeeded());
        assert_eq!(files_in(dir.path()), names(1..=5));
        assert_eq!(engine.throttle().outstanding(), 0);
    }

    #[test]
    fn failed_unit_is_reported_and_others_complete() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(
            test_config(dir.path(), 3, 2),
            stub_fetcher(Duration::ZERO, &[2]),
        )
        .unwrap();

        let result = engine.run(None).unwrap();

        assert_eq!(result.completed, 2);
        assert_eq!(
            result.failures,
            vec![UnitFailure {
                index: 2,
                error: "HTTP 500".to_string()
            }]
        );
        assert!(!result.all_succeeded());
        assert_eq!(files_in(dir.path()), names([1, 3]));
    }

    #[test]
    fn in_flight_never_exceeds_max_concurrency() {
        let dir = tempfile::tempdir().unwrap();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let (now, max) = (Arc::clone(&in_flight), Arc::clone(&max_seen));
        let fetcher: Arc<dyn Fetcher> = Arc::new(move |url: &str, dest: &Path| -> Result<u64, TransferError> {
            let current = now.fetch_add(1, Ordering::SeqCst) + 1;
            max.fetch_max(current, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(5));
            std::fs::write(dest, url).map_err(TransferError::Storage)?;
            now.fetch_sub(1, Ordering::SeqCst);
            Ok(0)
        });
        let engine = Engine::new(test_config(dir.path(), 40, 3), fetcher).unwrap();

        let result = engine.run(None).unwrap();

        assert_eq!(result.completed, 40);
        assert!(max_seen.load(Ordering::SeqCst) <= 3);
        assert!(max_seen.load(Ordering::SeqCst) >= 1);
        assert!(engine.throttle().peak() <= 3);
        assert_eq!(in_flight.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn progress_is_monotonic_and_ends_at_success_count() {
        let dir = tempfile::tempdir().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let on_progress: ProgressCallback = Arc::new(move |s: &ProgressStats| {
            assert!(s.completed <= s.total);
            sink.lock().unwrap().push(s.completed);
        });
        let engine = Engine::new(
            test_config(dir.path(), 30, 6),
            stub_fetcher(Duration::from_millis(1), &[4, 9, 17]),
        )
        .unwrap();

        let result = engine.run(Some(on_progress)).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(result.completed, 27);
        assert_eq!(seen.len(), 27);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*seen.last().unwrap(), 27);
        assert_eq!(
            result.failures.iter().map(|f| f.index).collect::<Vec<_>>(),
            vec![4, 9, 17]
        );
    }

    #[test]
    fn cancel_after_ten_completions_stops_admission_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(
            test_config(dir.path(), 100, 5),
            stub_fetcher(Duration::from_millis(10), &[]),
        )
        .unwrap();
        let coordinator = engine.coordinator();
        let token = engine.cancel_token().clone();
        let on_progress: ProgressCallback = Arc::new(move |s: &ProgressStats| {
            if s.completed == 10 {
                token.cancel();
            }
        });

        let result = engine.run(Some(on_progress)).unwrap();

        assert!(result.cancelled);
        assert!(result.settled);
        assert!(result.completed >= 10);
        // 10 completed plus at most 5 slot holders when the signal fired.
        assert!(result.admitted <= 15, "admitted {}", result.admitted);
        assert_eq!(
            result.completed + result.skipped + result.failures.len(),
            result.admitted
        );
        assert_eq!(files_in(dir.path()).len(), result.completed);

        let report = coordinator.shutdown();
        assert!(report.settled);
        assert_eq!(report.removed, result.completed);
        assert!(files_in(dir.path()).is_empty());
    }

    #[test]
    fn cancel_before_run_admits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let token = CancelToken::new();
        token.cancel();
        let engine = Engine::with_cancel_token(
            test_config(dir.path(), 10, 2),
            stub_fetcher(Duration::ZERO, &[]),
            token,
        )
        .unwrap();

        let result = engine.run(None).unwrap();

        assert!(result.cancelled);
        assert_eq!(result.admitted, 0);
        assert_eq!(result.completed, 0);
        assert!(files_in(dir.path()).is_empty());
    }

    #[test]
    fn zero_count_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(
            test_config(dir.path(), 0, 1),
            stub_fetcher(Duration::ZERO, &[]),
        )
        .unwrap();
        let result = engine.run(None).unwrap();
        assert_eq!(result.admitted, 0);
        assert!(result.settled);
        assert!(result.all_succeeded());
    }

    #[test]
    fn concurrency_above_count_is_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(
            test_config(dir.path(), 2, 16),
            stub_fetcher(Duration::ZERO, &[]),
        )
        .unwrap();
        assert_eq!(engine.run(None).unwrap().completed, 2);
    }

    #[test]
    fn custom_fetcher_error_is_recorded_with_its_message() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher: Arc<dyn Fetcher> = Arc::new(|url: &str, dest: &Path| -> Result<u64, TransferError> {
            if index_of(url) == 1 {
                return Err(TransferError::Other("empty body".to_string()));
            }
            std::fs::write(dest, url).map_err(TransferError::Storage)?;
            Ok(0)
        });
        let engine = Engine::new(test_config(dir.path(), 2, 1), fetcher).unwrap();

        let result = engine.run(None).unwrap();

        assert_eq!(
            result.failures,
            vec![UnitFailure {
                index: 1,
                error: "empty body".to_string()
            }]
        );
        assert_eq!(files_in(dir.path()), names([2]));
    }

    #[test]
    fn panicking_fetcher_fails_only_its_unit() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher: Arc<dyn Fetcher> = Arc::new(|url: &str, dest: &Path| -> Result<u64, TransferError> {
            if index_of(url) == 3 {
                panic!("fetcher exploded");
            }
            std::fs::write(dest, url).map_err(TransferError::Storage)?;
            Ok(0)
        });
        let engine = Engine::new(test_config(dir.path(), 4, 2), fetcher).unwrap();

        let result = engine.run(None).unwrap();

        assert_eq!(result.completed, 3);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].index, 3);
        assert!(result.failures[0].error.contains("fetcher exploded"));
        assert_eq!(engine.throttle().outstanding(), 0);
    }

    #[test]
    fn settle_timeout_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(dir.path(), 1, 1);
        cfg.settle_timeout_secs = 0;
        let engine = Engine::new(cfg, stub_fetcher(Duration::from_millis(300), &[])).unwrap();

        let result = engine.run(None).unwrap();
        assert!(!result.settled);
        assert_eq!(result.admitted, 1);

        // Let the straggler finish before the temp dir goes away.
        assert!(engine.coordinator().shutdown().settled);
    }

    #[test]
    fn engine_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(
            test_config(dir.path(), 1, 1),
            stub_fetcher(Duration::ZERO, &[]),
        )
        .unwrap();
        engine.run(None).unwrap();
        assert!(engine.run(None).is_err());
    }

    #[test]
    fn invalid_config_is_rejected_before_work() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path(), 3, 0);
        assert!(matches!(
            Engine::new(cfg, stub_fetcher(Duration::ZERO, &[])),
            Err(ConfigError::ZeroConcurrency)
        ));
    }
}
