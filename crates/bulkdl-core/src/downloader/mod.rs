//! Per-unit transfer: fetch one URL into one destination file.
//!
//! The engine only sees the `Fetcher` trait; `CurlFetcher` is the libcurl
//! implementation used by the CLI. Tests plug in closures.

mod error;
mod single;

pub use error::TransferError;
pub use single::CurlFetcher;

use std::path::Path;

/// Fetches `url` and leaves its body at `destination` on success, returning
/// the number of bytes written. On failure `destination` must not exist.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str, destination: &Path) -> Result<u64, TransferError>;
}

impl<F> Fetcher for F
where
    F: Fn(&str, &Path) -> Result<u64, TransferError> + Send + Sync,
{
    fn fetch(&self, url: &str, destination: &Path) -> Result<u64, TransferError> {
        self(url, destination)
    }
}
