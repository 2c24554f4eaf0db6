//! Host preconditions: root privileges and a Debian-family Linux.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{PatchError, Result};
use crate::util::is_root;

/// Default location of the os-release file.
pub const OS_RELEASE_PATH: &str = "/etc/os-release";

/// Distribution IDs whose tooling (`apt-get`, `resolvconf`) this crate drives.
const SUPPORTED_IDS: &[&str] = &["debian", "ubuntu"];

/// Fields read from `/etc/os-release`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OsRelease {
    /// `ID`, lowercased (e.g. `ubuntu`).
    pub id: String,
    /// `ID_LIKE`, split on whitespace.
    pub id_like: Vec<String>,
    /// `VERSION_ID`, if present (e.g. `22.04`).
    pub version_id: Option<String>,
    /// `PRETTY_NAME`, if present.
    pub pretty_name: Option<String>,
}

impl OsRelease {
    /// Parses os-release `KEY=value` content. Quotes are stripped, comments
    /// and malformed lines are skipped.
    #[must_use]
    pub fn parse(content: &str) -> Self {
        let fields: HashMap<&str, String> = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .filter_map(|l| l.split_once('='))
            .map(|(k, v)| (k.trim(), unquote(v.trim()).to_string()))
            .collect();

        Self {
            id: fields.get("ID").map(|s| s.to_lowercase()).unwrap_or_default(),
            id_like: fields
                .get("ID_LIKE")
                .map(|s| s.split_whitespace().map(str::to_lowercase).collect())
                .unwrap_or_default(),
            version_id: fields.get("VERSION_ID").cloned(),
            pretty_name: fields.get("PRETTY_NAME").cloned(),
        }
    }

    /// Reads and parses `path`.
    ///
    /// # Errors
    ///
    /// Returns [`PatchError::UnsupportedPlatform`] if the file is missing,
    /// or [`PatchError::Io`] if it cannot be read.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(Self::parse(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(PatchError::UnsupportedPlatform {
                    found: format!("no {}", path.display()),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Returns `true` for Debian, Ubuntu and their derivatives.
    #[must_use]
    pub fn is_debian_family(&self) -> bool {
        SUPPORTED_IDS.contains(&self.id.as_str())
            || self.id_like.iter().any(|l| SUPPORTED_IDS.contains(&l.as_str()))
    }

    /// Human-readable name for messages.
    #[must_use]
    pub fn describe(&self) -> String {
        self.pretty_name.clone().unwrap_or_else(|| {
            format!(
                "{} {}",
                self.id,
                self.version_id.as_deref().unwrap_or("(unknown version)")
            )
        })
    }
}

fn unquote(v: &str) -> &str {
    v.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| v.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
        .unwrap_or(v)
}

/// Fails unless the effective UID is 0.
///
/// # Errors
///
/// Returns [`PatchError::NotRoot`].
pub fn require_root() -> Result<()> {
    if is_root() {
        Ok(())
    } else {
        Err(PatchError::NotRoot)
    }
}

/// Fails unless running on Linux with a Debian-family os-release at `path`.
///
/// # Errors
///
/// Returns [`PatchError::UnsupportedPlatform`] describing what was found.
pub fn require_supported(path: &Path) -> Result<OsRelease> {
    if !cfg!(target_os = "linux") {
        return Err(PatchError::UnsupportedPlatform {
            found: std::env::consts::OS.to_string(),
        });
    }

    let release = OsRelease::load(path)?;
    if !release.is_debian_family() {
        return Err(PatchError::UnsupportedPlatform {
            found: release.describe(),
        });
    }
    tracing::debug!(os = %release.describe(), "Platform supported");
    Ok(release)
}
