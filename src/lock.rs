//! Exclusive advisory lock for a target file.
//!
//! The lock lives in a sibling file (`.<name>.lock`) rather than on the
//! target itself, because uninstall replaces the target's inode by rename.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use crate::error::{PatchError, Result};
use crate::util::parent_dir;

/// Held exclusive lock. Released when dropped.
#[derive(Debug)]
pub struct TargetLock {
    _file: File,
    path: PathBuf,
}

impl TargetLock {
    /// Lock file path for `target`.
    #[must_use]
    pub fn path_for(target: &Path) -> PathBuf {
        let name = target
            .file_name()
            .map_or_else(|| "target".into(), |n| n.to_string_lossy());
        parent_dir(target).join(format!(".{name}.lock"))
    }

    /// Takes the lock for `target` without blocking.
    ///
    /// Creates the parent directory if needed and records the current PID
    /// in the lock file.
    ///
    /// # Errors
    ///
    /// Returns [`PatchError::Locked`] if another process holds the lock, or
    /// [`PatchError::Io`] if the lock file cannot be opened or written.
    pub fn acquire(target: &Path) -> Result<Self> {
        let path = Self::path_for(target);
        std::fs::create_dir_all(parent_dir(&path))?;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if let Err(e) = try_lock_exclusive(&file) {
            if e.kind() == io::ErrorKind::WouldBlock {
                return Err(PatchError::Locked {
                    pid: read_pid(&mut file),
                    path,
                });
            }
            return Err(e.into());
        }

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        writeln!(file, "{}", std::process::id())?;
        file.flush()?;

        tracing::debug!(path = %path.display(), "Acquired target lock");
        Ok(Self { _file: file, path })
    }

    /// Returns the lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn try_lock_exclusive(file: &File) -> io::Result<()> {
    // SAFETY: the descriptor is owned by `file` and stays open for the call.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

fn read_pid(file: &mut File) -> Option<u32> {
    let mut contents = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_path_is_hidden_sibling() {
        assert_eq!(
            TargetLock::path_for(Path::new("/etc/sysctl.d/99-vpn-optimizer.conf")),
            PathBuf::from("/etc/sysctl.d/.99-vpn-optimizer.conf.lock")
        );
    }

    #[test]
    fn acquire_records_pid() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("head");
        let lock = TargetLock::acquire(&target).unwrap();

        let pid = std::fs::read_to_string(lock.path()).unwrap();
        assert_eq!(pid.trim(), std::process::id().to_string());
    }

    #[test]
    fn second_acquire_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("head");
        let _held = TargetLock::acquire(&target).unwrap();

        // flock locks belong to the open file description, so a second open
        // in the same process contends like another process would.
        match TargetLock::acquire(&target) {
            Err(PatchError::Locked { pid, .. }) => assert_eq!(pid, Some(std::process::id())),
            other => panic!("expected Locked, got {other:?}"),
        }
    }

    #[test]
    fn released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("head");
        drop(TargetLock::acquire(&target).unwrap());
        TargetLock::acquire(&target).unwrap();
    }
}
