//! Disk layout and file lifecycle for unit outputs.
//!
//! Each unit streams into `{index}.{ext}.part` and is atomically renamed to
//! `{index}.{ext}` on success. The ledger remembers what a run produced so a
//! cancelled run can remove exactly its own files.

mod ledger;
mod writer;

pub use ledger::{OutputLedger, RemovalReport};
pub use writer::UnitWriter;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Temporary file suffix used before atomic rename.
pub const TEMP_SUFFIX: &str = ".part";

/// Path for the temp file: appends `.part` to the final path (e.g. `3.png` → `3.png.part`).
pub fn temp_path(final_path: &Path) -> PathBuf {
    let mut o = final_path.as_os_str().to_owned();
    o.push(TEMP_SUFFIX);
    PathBuf::from(o)
}

/// Destination of unit `index` inside `save_dir`. Distinct indices always map
/// to distinct file names.
pub fn unit_path(save_dir: &Path, index: usize, extension: &str) -> PathBuf {
    let ext = extension.trim_start_matches('.');
    if ext.is_empty() {
        save_dir.join(index.to_string())
    } else {
        save_dir.join(format!("{}.{}", index, ext))
    }
}

/// Create the save directory (and parents) if it does not exist yet.
pub fn ensure_save_dir(save_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(save_dir)
        .with_context(|| format!("failed to create save directory {}", save_dir.display()))
}
