//! Sequential writer for one unit's temp file.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Streams a unit body into its `.part` file. Dropping the writer without
/// calling `finalize` leaves the temp file behind; call `discard` on failure.
pub struct UnitWriter {
    file: BufWriter<File>,
    temp_path: PathBuf,
    written: u64,
}

impl UnitWriter {
    /// Create (or truncate) the temp file at `temp_path`.
    pub fn create(temp_path: &Path) -> io::Result<Self> {
        let file = File::options()
            .write(true)
            .create(true)
            .truncate(true)
            .open(temp_path)?;
        Ok(Self {
            file: BufWriter::new(file),
            temp_path: temp_path.to_path_buf(),
            written: 0,
        })
    }

    pub fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data)?;
        self.written += data.len() as u64;
        Ok(())
    }

    /// Bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Flush, close and atomically rename the temp file to `final_path`.
    pub fn finalize(self, final_path: &Path) -> io::Result<u64> {
        let written = self.written;
        let temp_path = self.temp_path.clone();
        let file = self.file.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(&temp_path, final_path)?;
        Ok(written)
    }

    /// Close and delete the temp file.
    pub fn discard(self) {
        let temp_path = self.temp_path.clone();
        drop(self.file);
        if let Err(e) = std::fs::remove_file(&temp_path) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %temp_path.display(), "could not remove temp file: {}", e);
            }
        }
    }
}
