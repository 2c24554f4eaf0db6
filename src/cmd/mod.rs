//! Subcommand implementations.

pub mod dns;
pub mod sysctl;

use std::path::{Path, PathBuf};

use anyhow::Result;
use vpn_optimizer::platform;
use vpn_optimizer::{MarkerState, Outcome, PatchError};

use crate::output::{print_info, print_success, print_warning};
use crate::prompts;

/// Options shared by every subcommand.
#[derive(Debug)]
pub struct Context {
    pub assume_yes: bool,
    pub default_yes: bool,
    pub os_release: PathBuf,
}

impl Context {
    /// Root and platform checks required before touching system files.
    pub fn require_host(&self) -> Result<()> {
        platform::require_root()?;
        let release = platform::require_supported(&self.os_release)?;
        print_info(&format!("Detected {}", release.describe()));
        Ok(())
    }

    pub fn confirm(&self, message: &str) -> Result<bool> {
        prompts::confirm(message, self.assume_yes, self.default_yes)
    }
}

/// Fails on a duplicated sentinel before the operator is asked anything.
pub fn ensure_consistent(state: MarkerState, path: &Path) -> Result<()> {
    if let MarkerState::Inconsistent { count } = state {
        return Err(PatchError::InconsistentMarkerState {
            path: path.to_path_buf(),
            count,
        }
        .into());
    }
    Ok(())
}

pub fn report_outcome(outcome: Outcome, path: &Path) {
    let path = path.display();
    match outcome {
        Outcome::Installed => print_success(&format!("Installed settings in {path}")),
        Outcome::AlreadyInstalled => print_info(&format!("Already installed in {path}, nothing to do")),
        Outcome::Removed => print_success(&format!("Removed settings from {path}")),
        Outcome::NotInstalled => print_info(&format!("Not installed in {path}, nothing to do")),
        Outcome::Cancelled => print_warning("Cancelled, no changes made"),
    }
}

/// Prints the installed state; an inconsistent file is an error.
pub fn report_state(state: MarkerState, path: &Path) -> Result<()> {
    match state {
        MarkerState::Absent => print_info(&format!("not installed ({})", path.display())),
        MarkerState::Present => print_success(&format!("installed ({})", path.display())),
        MarkerState::Inconsistent { .. } => ensure_consistent(state, path)?,
    }
    Ok(())
}
