pub mod config;
pub mod logging;

pub mod control;
pub mod downloader;
pub mod scheduler;
pub mod storage;
pub mod url_model;

pub use config::RunConfig;
pub use control::{CancelCoordinator, CancelToken, CleanupReport};
pub use downloader::{CurlFetcher, Fetcher, TransferError};
pub use scheduler::{Engine, ProgressStats, RunResult, Throttle, UnitFailure};
