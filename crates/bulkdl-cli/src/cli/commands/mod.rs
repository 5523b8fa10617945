//! CLI command handlers. Each command is in its own file.

mod completions;
mod config_path;
mod run;

pub use completions::run_completions;
pub use config_path::run_config_path;
pub use run::{run_download, RunOverrides};
