//! CLI for the bulkdl bulk downloader.

mod commands;
mod prompt;

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

use commands::{run_completions, run_config_path, run_download, RunOverrides};

/// Top-level CLI for bulkdl.
#[derive(Debug, Parser)]
#[command(name = "bulkdl")]
#[command(about = "bulkdl: download N resources with bounded concurrency", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Download `count` units from the URL template into the save directory.
    Run {
        /// Config file (TOML, or JSON when it ends in .json). Defaults to the XDG config.
        #[arg(long, short = 'c', value_name = "PATH")]
        config: Option<PathBuf>,
        /// Number of units to download.
        #[arg(long, short = 'n')]
        count: Option<usize>,
        /// Maximum parallel downloads.
        #[arg(long, short = 'j', value_name = "K")]
        max_concurrency: Option<usize>,
        /// Source URL; `{index}` is replaced with the unit index.
        #[arg(long)]
        url: Option<String>,
        /// Directory receiving `{index}.{ext}` files.
        #[arg(long, value_name = "DIR")]
        save_path: Option<PathBuf>,
        /// Extension of saved files (empty for none).
        #[arg(long)]
        ext: Option<String>,
        /// Keep already-downloaded files when the run is cancelled.
        #[arg(long)]
        no_cleanup: bool,
        /// Ask for count and concurrency on stdin.
        #[arg(long, short = 'i')]
        interactive: bool,
    },

    /// Print the config file and log file locations.
    ConfigPath,

    /// Generate shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl CliCommand {
    /// Parse arguments and run the command. Returns the process exit code.
    pub async fn run_from_args() -> Result<i32> {
        let cli = Cli::parse();

        match cli.command {
            CliCommand::Run {
                config,
                count,
                max_concurrency,
                url,
                save_path,
                ext,
                no_cleanup,
                interactive,
            } => {
                let overrides = RunOverrides {
                    count,
                    max_concurrency,
                    url,
                    save_path,
                    ext,
                    no_cleanup,
                };
                run_download(config.as_deref(), overrides, interactive).await
            }
            CliCommand::ConfigPath => run_config_path().map(|_| 0),
            CliCommand::Completions { shell } => {
                run_completions(shell);
                Ok(0)
            }
        }
    }
}

#[cfg(test)]
mod tests;
