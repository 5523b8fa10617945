//! Single-stream HTTP GET of one unit with libcurl.
//!
//! The body streams into `{destination}.part`, which is renamed to the
//! destination once the response is known to be 2xx.

use std::path::Path;
use std::time::Duration;

use crate::config::HttpOptions;
use crate::storage::{self, UnitWriter};

use super::{Fetcher, TransferError};

/// `Fetcher` backed by one curl easy handle per unit.
#[derive(Debug, Clone, Default)]
pub struct CurlFetcher {
    http: HttpOptions,
}

impl CurlFetcher {
    pub fn new(http: HttpOptions) -> Self {
        Self { http }
    }

    fn configure(&self, easy: &mut curl::easy::Easy, url: &str) -> Result<(), curl::Error> {
        easy.url(url)?;
        easy.follow_location(true)?;
        easy.max_redirections(10)?;
        easy.connect_timeout(Duration::from_secs(self.http.connect_timeout_secs))?;
        // Abort stalled transfers instead of waiting for the hard timeout.
        easy.low_speed_limit(self.http.low_speed_limit)?;
        easy.low_speed_time(Duration::from_secs(self.http.low_speed_time_secs))?;
        easy.timeout(Duration::from_secs(self.http.timeout_secs))?;
        if let Some(ua) = &self.http.user_agent {
            easy.useragent(ua)?;
        }
        Ok(())
    }

    /// GET `url`, streaming the body into `writer`.
    fn transfer(&self, url: &str, writer: &mut UnitWriter) -> Result<(), TransferError> {
        let mut easy = curl::easy::Easy::new();
        self.configure(&mut easy, url)?;

        let mut storage_error: Option<std::io::Error> = None;
        let perform_result = {
            let mut transfer = easy.transfer();
            transfer.write_function(|data| match writer.write(data) {
                Ok(()) => Ok(data.len()),
                Err(e) => {
                    storage_error = Some(e);
                    Ok(0) // abort transfer
                }
            })?;
            transfer.perform()
        };
        if let Err(e) = perform_result {
            if e.is_write_error() {
                if let Some(io_err) = storage_error.take() {
                    return Err(TransferError::Storage(io_err));
                }
            }
            return Err(TransferError::Curl(e));
        }

        let code = easy.response_code()?;
        if !(200..300).contains(&code) {
            return Err(TransferError::Http(code));
        }
        Ok(())
    }
}

impl Fetcher for CurlFetcher {
    fn fetch(&self, url: &str, destination: &Path) -> Result<u64, TransferError> {
        let temp = storage::temp_path(destination);
        let mut writer = UnitWriter::create(&temp).map_err(TransferError::Storage)?;
        match self.transfer(url, &mut writer) {
            Ok(()) => writer.finalize(destination).map_err(TransferError::Storage),
            Err(e) => {
                writer.discard();
                Err(e)
            }
        }
    }
}
