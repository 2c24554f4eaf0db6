//! Package and service manager operations.

use crate::error::{PatchError, Result};
use crate::reload::{CommandRunner, command_line};

/// `systemctl` verbs used by the DNS profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitAction {
    Enable,
    Disable,
    Mask,
    Unmask,
    Stop,
    Restart,
}

impl UnitAction {
    /// The `systemctl` subcommand.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Enable => "enable",
            Self::Disable => "disable",
            Self::Mask => "mask",
            Self::Unmask => "unmask",
            Self::Stop => "stop",
            Self::Restart => "restart",
        }
    }
}

/// `apt-get`/`dpkg` and `systemctl` driven through a [`CommandRunner`].
#[derive(Debug, Clone)]
pub struct HostServices<R> {
    runner: R,
}

impl<R: CommandRunner> HostServices<R> {
    /// Wraps `runner`.
    pub const fn new(runner: R) -> Self {
        Self { runner }
    }

    /// Returns `true` if `dpkg -s <name>` succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`PatchError::Io`] if `dpkg` cannot be spawned.
    pub fn is_package_installed(&self, name: &str) -> Result<bool> {
        Ok(self.runner.run("dpkg", &["-s", name])? == 0)
    }

    /// `apt-get install -y <name>`.
    ///
    /// # Errors
    ///
    /// Returns [`PatchError::CommandFailed`] on a non-zero exit.
    pub fn install_package(&self, name: &str) -> Result<()> {
        tracing::info!(package = name, "Installing package");
        self.checked("apt-get", &["install", "-y", name])
    }

    /// `apt-get remove -y <name>`.
    ///
    /// # Errors
    ///
    /// Returns [`PatchError::CommandFailed`] on a non-zero exit.
    pub fn remove_package(&self, name: &str) -> Result<()> {
        tracing::info!(package = name, "Removing package");
        self.checked("apt-get", &["remove", "-y", name])
    }

    /// Returns `true` if `systemctl is-active --quiet <unit>` succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`PatchError::Io`] if `systemctl` cannot be spawned.
    pub fn is_active(&self, unit: &str) -> Result<bool> {
        Ok(self.runner.run("systemctl", &["is-active", "--quiet", unit])? == 0)
    }

    /// `systemctl <action> <unit>`.
    ///
    /// # Errors
    ///
    /// Returns [`PatchError::CommandFailed`] on a non-zero exit.
    pub fn systemctl(&self, action: UnitAction, unit: &str) -> Result<()> {
        tracing::info!(unit, action = action.as_str(), "Changing service state");
        self.checked("systemctl", &[action.as_str(), unit])
    }

    fn checked(&self, program: &str, args: &[&str]) -> Result<()> {
        let code = self.runner.run(program, args)?;
        if code == 0 {
            Ok(())
        } else {
            Err(PatchError::CommandFailed {
                command: command_line(program, args),
                code,
            })
        }
    }
}
