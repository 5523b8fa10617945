//! Unit transfer error type.

use std::io;

/// Why a single unit failed. Reported per unit; never aborts the run.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// Curl reported an error (timeout, connection, DNS, etc.).
    #[error("{0}")]
    Curl(#[from] curl::Error),
    /// HTTP response had a non-2xx status.
    #[error("HTTP {0}")]
    Http(u32),
    /// Disk write, flush or rename failed (e.g. disk full, permission denied).
    #[error("storage: {0}")]
    Storage(#[source] io::Error),
    /// The fetcher panicked; the unit is treated as failed.
    #[error("worker panicked: {0}")]
    Panicked(String),
    /// Failure reported by a custom fetcher.
    #[error("{0}")]
    Other(String),
}
