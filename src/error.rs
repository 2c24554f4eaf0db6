//! Error types.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias for patcher operations.
pub type Result<T> = std::result::Result<T, PatchError>;

/// Errors returned by patcher operations.
///
/// Every variant is fatal for the current run. Nothing is retried and
/// backups are never restored automatically.
#[derive(Debug, Error)]
pub enum PatchError {
    /// Filesystem I/O failed (typically `PermissionDenied` under `/etc`).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The process is not running with an effective UID of 0.
    #[error("this operation must be run as root")]
    NotRoot,

    /// The host is not a Debian-family Linux system.
    #[error("unsupported platform: {found}")]
    UnsupportedPlatform {
        /// Description of the detected platform.
        found: String,
    },

    /// The sentinel appears more than once in the target file.
    #[error(
        "marker appears {count} times in {}; fix the file by hand before running again",
        .path.display()
    )]
    InconsistentMarkerState {
        /// The target file.
        path: PathBuf,
        /// Number of sentinel lines found.
        count: usize,
    },

    /// The reload command exited with a non-zero status.
    #[error("reload command `{command}` failed with exit code {code}")]
    ReloadCommandFailed {
        /// The command line that was run.
        command: String,
        /// Its exit code (`-1` when terminated by a signal).
        code: i32,
    },

    /// A package or service manager command exited with a non-zero status.
    #[error("command `{command}` failed with exit code {code}")]
    CommandFailed {
        /// The command line that was run.
        command: String,
        /// Its exit code (`-1` when terminated by a signal).
        code: i32,
    },

    /// A post-write check of the file or derived output failed.
    #[error("verification failed: {0}")]
    VerificationFailed(String),

    /// Invalid configuration values.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Another invocation holds the lock for this target.
    #[error("{} is locked by another process{}", .path.display(), pid_suffix(.pid))]
    Locked {
        /// The lock file.
        path: PathBuf,
        /// PID recorded by the holder, if readable.
        pid: Option<u32>,
    },
}

#[allow(clippy::ref_option)]
fn pid_suffix(pid: &Option<u32>) -> String {
    pid.map(|p| format!(" (pid {p})")).unwrap_or_default()
}

impl PatchError {
    /// Returns `true` if the underlying I/O error is `PermissionDenied`.
    #[must_use]
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == std::io::ErrorKind::PermissionDenied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_is_detected() {
        let err = PatchError::from(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        assert!(err.is_permission_denied());
        assert!(!PatchError::NotRoot.is_permission_denied());
    }

    #[test]
    fn locked_message_includes_pid_when_known() {
        let err = PatchError::Locked {
            path: PathBuf::from("/tmp/.x.lock"),
            pid: Some(42),
        };
        assert_eq!(err.to_string(), "/tmp/.x.lock is locked by another process (pid 42)");

        let err = PatchError::Locked {
            path: PathBuf::from("/tmp/.x.lock"),
            pid: None,
        };
        assert_eq!(err.to_string(), "/tmp/.x.lock is locked by another process");
    }
}
