//! `bulkdl run` – download `count` units with bounded concurrency.

use anyhow::{Context, Result};
use bulkdl_core::config::{self, RunConfig};
use bulkdl_core::scheduler::{channel_callback, Engine, ProgressStats, RunResult};
use bulkdl_core::storage::ensure_save_dir;
use bulkdl_core::{CleanupReport, CurlFetcher};
use std::future::Future;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use crate::cli::prompt;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Exit code after an operator interrupt (128 + SIGINT).
const EXIT_INTERRUPTED: i32 = 130;
/// Exit code when the run finished without every unit written.
const EXIT_PARTIAL: i32 = 2;

/// Command-line values that replace the config file's.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub count: Option<usize>,
    pub max_concurrency: Option<usize>,
    pub url: Option<String>,
    pub save_path: Option<PathBuf>,
    pub ext: Option<String>,
    pub no_cleanup: bool,
}

impl RunOverrides {
    pub fn apply(self, cfg: &mut RunConfig) {
        if let Some(count) = self.count {
            cfg.count = count;
        }
        if let Some(max) = self.max_concurrency {
            cfg.max_concurrency = max;
        }
        if let Some(url) = self.url {
            cfg.download_url = url;
        }
        if let Some(path) = self.save_path {
            cfg.save_path = path;
        }
        if let Some(ext) = self.ext {
            cfg.file_extension = ext;
        }
        if self.no_cleanup {
            cfg.cleanup_on_cancel = false;
        }
    }
}

/// Load the config file (explicit path or XDG default), then apply prompts and overrides.
fn resolve_config(
    config_file: Option<&Path>,
    overrides: RunOverrides,
    interactive: bool,
) -> Result<RunConfig> {
    let mut cfg = match config_file {
        Some(path) => config::load_from_path(path)?,
        None => config::load_or_init()?,
    };
    if interactive {
        let (count, max) = prompt::ask_count_and_concurrency()?;
        cfg.count = count;
        cfg.max_concurrency = max;
    }
    overrides.apply(&mut cfg);
    cfg.validate()?;
    tracing::debug!("resolved run config: {:?}", cfg);
    Ok(cfg)
}

pub async fn run_download(
    config_file: Option<&Path>,
    overrides: RunOverrides,
    interactive: bool,
) -> Result<i32> {
    let cfg = resolve_config(config_file, overrides, interactive)?;
    download(cfg, tokio::signal::ctrl_c()).await
}

/// Run one download and map its outcome to an exit code. `interrupt` resolving
/// to `Ok(())` cancels the run and cleans up.
async fn download<F>(cfg: RunConfig, interrupt: F) -> Result<i32>
where
    F: Future<Output = io::Result<()>>,
{
    ensure_save_dir(&cfg.save_path)?;

    println!(
        "Downloading {} items ({} parallel downloads at most)",
        cfg.count, cfg.max_concurrency
    );

    let fetcher = Arc::new(CurlFetcher::new(cfg.http.clone()));
    let engine = Arc::new(Engine::new(cfg, fetcher)?);
    let coordinator = engine.coordinator();

    let (progress_tx, progress_rx) = tokio::sync::mpsc::channel::<ProgressStats>(64);
    let progress_handle = tokio::spawn(render_progress(progress_rx));
    let on_progress = channel_callback(progress_tx);

    let run = tokio::task::spawn_blocking({
        let engine = Arc::clone(&engine);
        move || engine.run(Some(on_progress))
    });

    let result = match wait_for_run(run, interrupt).await? {
        RunOutcome::Finished(result) => result,
        RunOutcome::Interrupted => {
            println!();
            eprintln!("Interrupted; stopping new downloads and cleaning up...");
            let report = tokio::task::spawn_blocking(move || coordinator.shutdown())
                .await
                .context("cleanup task join")?;
            print_cleanup(&report);
            return Ok(EXIT_INTERRUPTED);
        }
    };

    // Stragglers past the settle timeout may still hold the progress sender.
    let _ = tokio::time::timeout(Duration::from_secs(1), progress_handle).await;

    print_summary(&result);
    Ok(exit_code(&result))
}

enum RunOutcome {
    Finished(RunResult),
    Interrupted,
}

/// Wait for the engine, or for `interrupt`. An interrupt source that fails
/// (signal handler not installable) is logged and ignored.
async fn wait_for_run<F>(
    mut run: JoinHandle<Result<RunResult>>,
    interrupt: F,
) -> Result<RunOutcome>
where
    F: Future<Output = io::Result<()>>,
{
    tokio::pin!(interrupt);
    let mut listening = true;
    loop {
        tokio::select! {
            joined = &mut run => {
                return Ok(RunOutcome::Finished(joined.context("engine task join")??));
            }
            signal = &mut interrupt, if listening => match signal {
                Ok(()) => return Ok(RunOutcome::Interrupted),
                Err(e) => {
                    tracing::warn!("cannot listen for Ctrl-C: {}", e);
                    eprintln!("warning: Ctrl-C handling unavailable: {}", e);
                    listening = false;
                }
            },
        }
    }
}

/// 0 only when every requested unit was written; units still in flight count as not written.
fn exit_code(result: &RunResult) -> i32 {
    if result.all_succeeded() {
        0
    } else {
        EXIT_PARTIAL
    }
}

async fn render_progress(mut progress_rx: tokio::sync::mpsc::Receiver<ProgressStats>) {
    let mut last_print: Option<Instant> = None;
    let mut printed = false;
    while let Some(stats) = progress_rx.recv().await {
        let now = Instant::now();
        let due = last_print.map_or(true, |t| now.duration_since(t) >= PROGRESS_INTERVAL);
        if due || stats.is_complete() {
            let eta = stats
                .eta_secs()
                .map(|s| format!("{:.0}s", s))
                .unwrap_or_else(|| "?".to_string());
            print!(
                "\rProgress: {}/{} ({:.0}%)  {:.1} items/s  ETA {}  ",
                stats.completed,
                stats.total,
                stats.fraction() * 100.0,
                stats.units_per_sec(),
                eta
            );
            let _ = std::io::stdout().flush();
            last_print = Some(now);
            printed = true;
        }
    }
    if printed {
        println!();
    }
}

fn print_summary(result: &RunResult) {
    println!("{}", result);
    for failure in &result.failures {
        println!("  error downloading item {}: {}", failure.index, failure.error);
    }
}

fn print_cleanup(report: &CleanupReport) {
    if !report.settled {
        eprintln!("warning: some transfers were still running when cleanup started");
    }
    if report.cleanup_enabled {
        println!("Removed {} downloaded file(s).", report.removed);
        for (path, e) in &report.failed {
            eprintln!("  could not remove {}: {}", path.display(), e);
        }
    } else {
        println!("Cleanup disabled; downloaded files were kept.");
    }
}
