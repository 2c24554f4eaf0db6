//! Internal utilities.

use std::path::Path;

/// Returns `true` if the effective UID is 0.
#[must_use]
pub fn is_root() -> bool {
    // SAFETY: `geteuid` has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

/// Flushes directory metadata so a preceding rename survives a crash.
///
/// # Errors
///
/// Returns the I/O error from opening or syncing the directory.
pub fn sync_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::File::open(dir)?.sync_all()
}

/// Directory containing `path`, treating a bare file name as `.`.
#[must_use]
pub fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_matches_libc() {
        // SAFETY: see `is_root`.
        let euid = unsafe { libc::geteuid() };
        assert_eq!(is_root(), euid == 0);
    }

    #[test]
    fn parent_of_bare_name_is_cwd() {
        assert_eq!(parent_dir(Path::new("head")), Path::new("."));
        assert_eq!(
            parent_dir(Path::new("/etc/sysctl.d/99-x.conf")),
            Path::new("/etc/sysctl.d")
        );
    }

    #[test]
    fn sync_dir_on_tempdir() {
        let dir = tempfile::tempdir().unwrap();
        sync_dir(dir.path()).unwrap();
    }
}
