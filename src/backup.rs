//! Timestamped backups taken before a target is mutated.
//!
//! Backups are written next to the target as `<name>.bak-<YYYYmmddHHMMSS>`
//! and are never removed or restored by this crate.

use std::path::{Path, PathBuf};

use chrono::Local;

use crate::error::Result;

/// Copies `path` to a fresh timestamped backup.
///
/// Returns `None` without writing anything when the file does not exist or
/// is empty. If a backup with the same timestamp already exists, a numeric
/// suffix is appended.
///
/// # Errors
///
/// Returns [`crate::PatchError::Io`] if the copy fails.
pub fn backup_file(path: &Path) -> Result<Option<PathBuf>> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.len() > 0 => {}
        Ok(_) => return Ok(None),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let stamp = Local::now().format("%Y%m%d%H%M%S").to_string();
    let dest = next_free(path, &stamp);
    std::fs::copy(path, &dest)?;

    tracing::info!(
        path = %path.display(),
        backup = %dest.display(),
        "Backed up target file"
    );
    Ok(Some(dest))
}

fn next_free(path: &Path, stamp: &str) -> PathBuf {
    let base = format!("{}.bak-{stamp}", path.display());
    let mut candidate = PathBuf::from(&base);
    let mut n = 1;
    while candidate.exists() {
        candidate = PathBuf::from(format!("{base}.{n}"));
        n += 1;
    }
    candidate
}
