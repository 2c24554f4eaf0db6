//! Markered block management for line-oriented config files.
//!
//! A block is installed by appending a blank separator, a sentinel line and
//! the block lines. The sentinel makes installs idempotent: it is counted on
//! every run and a second install becomes a no-op. Removal filters the block
//! text back out and replaces the file by atomic rename.

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::backup::backup_file;
use crate::config::SettingsBlock;
use crate::error::{PatchError, Result};
use crate::lock::TargetLock;
use crate::reload::Reloader;
use crate::util::{parent_dir, sync_dir};

/// Installed state of a block, derived from the sentinel count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerState {
    /// No sentinel line.
    Absent,
    /// Exactly one sentinel line.
    Present,
    /// More than one sentinel line. Requires manual repair.
    Inconsistent {
        /// Number of sentinel lines found.
        count: usize,
    },
}

impl MarkerState {
    /// Classifies a sentinel count.
    #[must_use]
    pub const fn from_count(count: usize) -> Self {
        match count {
            0 => Self::Absent,
            1 => Self::Present,
            count => Self::Inconsistent { count },
        }
    }
}

/// Result of an install or uninstall request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The block was appended and the reload ran.
    Installed,
    /// The sentinel was already present; nothing changed.
    AlreadyInstalled,
    /// The block was removed and the reload ran.
    Removed,
    /// The sentinel was absent; nothing changed.
    NotInstalled,
    /// The operator declined; nothing changed.
    Cancelled,
}

impl Outcome {
    /// Returns `true` if the target file was modified.
    #[must_use]
    pub const fn changed(self) -> bool {
        matches!(self, Self::Installed | Self::Removed)
    }
}

/// A target file that may hold markered blocks.
///
/// The file does not need to exist; a missing file reads as empty and is
/// created on install.
#[derive(Debug, Clone)]
pub struct MarkeredFile {
    path: PathBuf,
    backups: bool,
}

impl MarkeredFile {
    /// Handle for `path` with backups enabled.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            backups: true,
        }
    }

    /// Disables pre-mutation backups.
    #[must_use]
    pub const fn without_backups(mut self) -> Self {
        self.backups = false;
        self
    }

    /// Returns the target path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the whole file, treating a missing file as empty.
    ///
    /// # Errors
    ///
    /// Returns [`PatchError::Io`] for any error other than `NotFound`.
    pub fn read(&self) -> Result<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Counts lines exactly equal to `sentinel` and classifies the result.
    ///
    /// # Errors
    ///
    /// Returns [`PatchError::Io`] if the file cannot be read.
    pub fn detect(&self, sentinel: &str) -> Result<MarkerState> {
        Ok(MarkerState::from_count(count_sentinel(
            &self.read()?,
            sentinel,
        )))
    }

    /// Lines following the sentinel up to the next blank line or EOF.
    ///
    /// Returns `None` unless the sentinel appears exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`PatchError::Io`] if the file cannot be read.
    pub fn installed_lines(&self, sentinel: &str) -> Result<Option<Vec<String>>> {
        let content = self.read()?;
        if count_sentinel(&content, sentinel) != 1 {
            return Ok(None);
        }
        Ok(Some(
            content
                .lines()
                .skip_while(|l| *l != sentinel)
                .skip(1)
                .take_while(|l| !l.trim().is_empty())
                .map(str::to_string)
                .collect(),
        ))
    }

    /// Appends `block` unless its sentinel is already present.
    ///
    /// Existing content is never truncated. The file is synced to disk
    /// before this returns.
    ///
    /// # Errors
    ///
    /// Returns [`PatchError::InconsistentMarkerState`] if the sentinel
    /// appears more than once, [`PatchError::VerificationFailed`] if the
    /// sentinel is not found exactly once after the write, or
    /// [`PatchError::Io`] on I/O failure.
    pub fn install(&self, block: &SettingsBlock) -> Result<Outcome> {
        block.validate()?;
        let content = self.read()?;
        if self.classify(&content, &block.sentinel)? == MarkerState::Present {
            return Ok(Outcome::AlreadyInstalled);
        }

        std::fs::create_dir_all(parent_dir(&self.path))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(render_block(&content, block).as_bytes())?;
        file.sync_all()?;
        drop(file);

        self.expect_state(&block.sentinel, MarkerState::Present)?;
        tracing::info!(
            path = %self.path.display(),
            sentinel = %block.sentinel,
            lines = block.lines.len(),
            "Installed settings block"
        );
        Ok(Outcome::Installed)
    }

    /// Removes the sentinel, its separator and the block text after it.
    ///
    /// Lines in the block region that no longer match `block` exactly (for
    /// example after a hand edit) are left in place and logged. The new
    /// content is written to a temporary file beside the target and renamed
    /// over it, so an interrupted run leaves the old content intact.
    ///
    /// # Errors
    ///
    /// Returns [`PatchError::InconsistentMarkerState`] if the sentinel
    /// appears more than once, [`PatchError::VerificationFailed`] if the
    /// sentinel survives the rewrite, or [`PatchError::Io`] on I/O failure.
    pub fn uninstall(&self, block: &SettingsBlock) -> Result<Outcome> {
        block.validate()?;
        let content = self.read()?;
        if self.classify(&content, &block.sentinel)? == MarkerState::Absent {
            return Ok(Outcome::NotInstalled);
        }

        let removal = remove_block(&content, &block.sentinel, &block.lines);
        if !removal.stray.is_empty() {
            tracing::warn!(
                path = %self.path.display(),
                stray = ?removal.stray,
                "Block was edited after install; leaving unmatched lines in place"
            );
        }

        let staged = self.stage(&removal.content)?;
        self.commit(staged)?;

        self.expect_state(&block.sentinel, MarkerState::Absent)?;
        tracing::info!(
            path = %self.path.display(),
            sentinel = %block.sentinel,
            "Removed settings block"
        );
        Ok(Outcome::Removed)
    }

    /// Writes `content` to a synced temporary file next to the real target,
    /// carrying over the target's mode and ownership.
    pub(crate) fn stage(&self, content: &str) -> Result<NamedTempFile> {
        let real = self.real_path()?;
        let mut tmp = NamedTempFile::new_in(parent_dir(&real))?;
        tmp.write_all(content.as_bytes())?;

        if let Ok(meta) = std::fs::metadata(&real) {
            tmp.as_file().set_permissions(meta.permissions())?;
            if let Err(e) =
                std::os::unix::fs::fchown(tmp.as_file(), Some(meta.uid()), Some(meta.gid()))
            {
                tracing::warn!(
                    path = %real.display(),
                    error = %e,
                    "Could not preserve file ownership"
                );
            }
        }

        tmp.as_file().sync_all()?;
        Ok(tmp)
    }

    /// Renames a staged file over the real target and syncs the directory.
    pub(crate) fn commit(&self, staged: NamedTempFile) -> Result<()> {
        let real = self.real_path()?;
        staged.persist(&real).map_err(|e| PatchError::Io(e.error))?;
        sync_dir(parent_dir(&real))?;
        Ok(())
    }

    /// Follows a symlinked target so the rename replaces the file it points
    /// to instead of the link.
    fn real_path(&self) -> Result<PathBuf> {
        match std::fs::symlink_metadata(&self.path) {
            Ok(meta) if meta.file_type().is_symlink() => Ok(std::fs::canonicalize(&self.path)?),
            _ => Ok(self.path.clone()),
        }
    }

    fn classify(&self, content: &str, sentinel: &str) -> Result<MarkerState> {
        match MarkerState::from_count(count_sentinel(content, sentinel)) {
            MarkerState::Inconsistent { count } => Err(PatchError::InconsistentMarkerState {
                path: self.path.clone(),
                count,
            }),
            state => Ok(state),
        }
    }

    fn expect_state(&self, sentinel: &str, expected: MarkerState) -> Result<()> {
        let actual = self.detect(sentinel)?;
        if actual == expected {
            Ok(())
        } else {
            Err(PatchError::VerificationFailed(format!(
                "{} is {actual:?} after write, expected {expected:?}",
                self.path.display()
            )))
        }
    }
}

/// Applies or removes one settings block on one file and runs its reload.
///
/// The sequence detect → mutate → reload runs under an exclusive lock on the
/// target, so concurrent invocations against the same file fail fast
/// instead of interleaving.
///
/// # Example
///
/// ```rust,ignore
/// use vpn_optimizer::{CommandReloader, MarkeredFile, Patcher, SettingsBlock, SystemRunner};
///
/// let patcher = Patcher::new(
///     MarkeredFile::new("/etc/sysctl.d/99-vpn-optimizer.conf"),
///     SettingsBlock::new("#MARK").with_line("net.ipv4.tcp_window_scaling = 1"),
/// );
/// patcher.install(true, &CommandReloader::sysctl(SystemRunner))?;
/// ```
#[derive(Debug, Clone)]
pub struct Patcher {
    file: MarkeredFile,
    block: SettingsBlock,
}

impl Patcher {
    /// Pairs a target file with the block it manages.
    #[must_use]
    pub const fn new(file: MarkeredFile, block: SettingsBlock) -> Self {
        Self { file, block }
    }

    /// Returns the target file.
    #[must_use]
    pub const fn file(&self) -> &MarkeredFile {
        &self.file
    }

    /// Returns the managed block.
    #[must_use]
    pub const fn block(&self) -> &SettingsBlock {
        &self.block
    }

    /// Current installed state of the block.
    ///
    /// # Errors
    ///
    /// Returns [`PatchError::Io`] if the file cannot be read.
    pub fn status(&self) -> Result<MarkerState> {
        self.file.detect(&self.block.sentinel)
    }

    /// Installs the block and runs `reloader` once the write is on disk.
    ///
    /// An already installed block is reported as
    /// [`Outcome::AlreadyInstalled`] even when `confirmed` is `false`. The
    /// reloader only runs after an actual change.
    ///
    /// # Errors
    ///
    /// Returns [`PatchError::Locked`] if another invocation holds the
    /// target, [`PatchError::InconsistentMarkerState`] for a duplicated
    /// sentinel, or whatever the write or the reloader fails with.
    pub fn install(&self, confirmed: bool, reloader: &dyn Reloader) -> Result<Outcome> {
        self.install_with(confirmed, reloader, || Ok(()))
    }

    /// Like [`Patcher::install`], running `before_write` under the lock once
    /// the block is known to be absent and the change is confirmed.
    ///
    /// Nothing is written if `before_write` fails.
    ///
    /// # Errors
    ///
    /// Same as [`Patcher::install`], plus whatever `before_write` returns.
    pub fn install_with<F>(
        &self,
        confirmed: bool,
        reloader: &dyn Reloader,
        before_write: F,
    ) -> Result<Outcome>
    where
        F: FnOnce() -> Result<()>,
    {
        let _lock = self.lock()?;
        self.install_locked(confirmed, reloader, before_write)
    }

    /// Removes the block and runs `reloader` once the rename is on disk.
    ///
    /// # Errors
    ///
    /// Same as [`Patcher::install`].
    pub fn uninstall(&self, confirmed: bool, reloader: &dyn Reloader) -> Result<Outcome> {
        let _lock = self.lock()?;
        self.uninstall_locked(confirmed, reloader)
    }

    /// Takes the exclusive lock on the target.
    pub(crate) fn lock(&self) -> Result<TargetLock> {
        self.block.validate()?;
        TargetLock::acquire(self.file.path())
    }

    /// Install steps for a caller already holding [`Patcher::lock`].
    pub(crate) fn install_locked<F>(
        &self,
        confirmed: bool,
        reloader: &dyn Reloader,
        before_write: F,
    ) -> Result<Outcome>
    where
        F: FnOnce() -> Result<()>,
    {
        match self.checked_state()? {
            MarkerState::Present => {
                self.warn_if_drifted()?;
                tracing::debug!(path = %self.file.path().display(), "Block already installed");
                return Ok(Outcome::AlreadyInstalled);
            }
            MarkerState::Absent if !confirmed => return Ok(Outcome::Cancelled),
            _ => {}
        }

        before_write()?;
        if self.file.backups {
            backup_file(self.file.path())?;
        }
        let outcome = self.file.install(&self.block)?;
        reloader.apply()?;
        Ok(outcome)
    }

    /// Uninstall steps for a caller already holding [`Patcher::lock`].
    pub(crate) fn uninstall_locked(
        &self,
        confirmed: bool,
        reloader: &dyn Reloader,
    ) -> Result<Outcome> {
        match self.checked_state()? {
            MarkerState::Absent => {
                tracing::debug!(path = %self.file.path().display(), "Block not installed");
                return Ok(Outcome::NotInstalled);
            }
            MarkerState::Present if !confirmed => return Ok(Outcome::Cancelled),
            _ => {}
        }

        if self.file.backups {
            backup_file(self.file.path())?;
        }
        let outcome = self.file.uninstall(&self.block)?;
        reloader.apply()?;
        Ok(outcome)
    }

    fn checked_state(&self) -> Result<MarkerState> {
        match self.status()? {
            MarkerState::Inconsistent { count } => {
                tracing::warn!(
                    path = %self.file.path().display(),
                    count,
                    "Sentinel appears more than once, refusing to touch the file"
                );
                Err(PatchError::InconsistentMarkerState {
                    path: self.file.path().to_path_buf(),
                    count,
                })
            }
            state => Ok(state),
        }
    }

    fn warn_if_drifted(&self) -> Result<()> {
        if let Some(installed) = self.file.installed_lines(&self.block.sentinel)? {
            if installed != self.block.lines {
                tracing::warn!(
                    path = %self.file.path().display(),
                    "Installed block differs from the requested one; uninstall first to replace it"
                );
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Content helpers
// ---------------------------------------------------------------------------

fn count_sentinel(content: &str, sentinel: &str) -> usize {
    content.lines().filter(|l| *l == sentinel).count()
}

/// Text appended on install.
///
/// ```text
/// <existing content, newline-terminated>
///
/// #MARK
/// net.ipv4.tcp_window_scaling = 1
/// ```
fn render_block(existing: &str, block: &SettingsBlock) -> String {
    let mut out = String::new();
    if !existing.is_empty() && !existing.ends_with('\n') {
        out.push('\n');
    }
    out.push('\n');
    out.push_str(&block.sentinel);
    out.push('\n');
    for line in &block.lines {
        out.push_str(line);
        out.push('\n');
    }
    out
}

struct Removal {
    content: String,
    stray: Vec<String>,
}

/// Drops every sentinel line, the blank line right before it, and each line
/// of the following region (up to a blank line) that matches a not yet
/// consumed block line. Kept lines keep their own terminators.
fn remove_block(content: &str, sentinel: &str, block: &[String]) -> Removal {
    let lines: Vec<&str> = content.split_inclusive('\n').collect();
    let mut kept: Vec<&str> = Vec::with_capacity(lines.len());
    let mut stray = Vec::new();

    let mut i = 0;
    while i < lines.len() {
        if text(lines[i]) != sentinel {
            kept.push(lines[i]);
            i += 1;
            continue;
        }

        if kept.last().is_some_and(|l| l.trim().is_empty()) {
            kept.pop();
        }
        i += 1;

        let mut pending: Vec<&str> = block.iter().map(String::as_str).collect();
        while i < lines.len() && !lines[i].trim().is_empty() && text(lines[i]) != sentinel {
            let line = text(lines[i]);
            if let Some(pos) = pending.iter().position(|want| *want == line) {
                pending.remove(pos);
            } else {
                stray.push(line.to_string());
                kept.push(lines[i]);
            }
            i += 1;
        }
    }

    Removal {
        content: kept.concat(),
        stray,
    }
}

/// A line without its `\n` or `\r\n` terminator.
fn text(line: &str) -> &str {
    match line.strip_suffix('\n') {
        Some(l) => l.strip_suffix('\r').unwrap_or(l),
        None => line,
    }
}
