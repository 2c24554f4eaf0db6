//! Reload actions and external command execution.
//!
//! A [`Reloader`] makes a freshly written config file take effect on the
//! running system. Production reloaders shell out through a
//! [`CommandRunner`]; tests substitute closures or recording fakes.

use std::process::Command;

use crate::error::{PatchError, Result};

/// Makes a config file's content take effect.
pub trait Reloader {
    /// Runs the reload action.
    ///
    /// # Errors
    ///
    /// Returns an error if the action fails; the caller treats it as fatal.
    fn apply(&self) -> Result<()>;
}

impl<F> Reloader for F
where
    F: Fn() -> Result<()>,
{
    fn apply(&self) -> Result<()> {
        self()
    }
}

/// Reloader that does nothing, for targets read directly by their consumer.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReloader;

impl Reloader for NoopReloader {
    fn apply(&self) -> Result<()> {
        tracing::debug!("No reload action configured");
        Ok(())
    }
}

/// Runs external programs and reports their exit code.
pub trait CommandRunner {
    /// Runs `program` with `args`, waits for it, and returns its exit code.
    /// A process killed by a signal reports `-1`.
    ///
    /// # Errors
    ///
    /// Returns [`PatchError::Io`] if the program cannot be spawned.
    fn run(&self, program: &str, args: &[&str]) -> Result<i32>;
}

/// [`CommandRunner`] backed by [`std::process::Command`].
///
/// Output is inherited so the operator sees what the tool prints.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<i32> {
        tracing::debug!(program, ?args, "Running command");
        let status = Command::new(program).args(args).status()?;
        Ok(status.code().unwrap_or(-1))
    }
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, program: &str, args: &[&str]) -> Result<i32> {
        (**self).run(program, args)
    }
}

/// Formats a command line for messages.
#[must_use]
pub fn command_line(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

/// [`Reloader`] that runs one fixed command.
///
/// # Example
///
/// ```
/// use vpn_optimizer::{CommandReloader, SystemRunner};
///
/// let reloader = CommandReloader::new(SystemRunner, "sysctl", ["--system"]);
/// assert_eq!(reloader.command_line(), "sysctl --system");
/// ```
#[derive(Debug, Clone)]
pub struct CommandReloader<R> {
    runner: R,
    program: String,
    args: Vec<String>,
}

impl<R: CommandRunner> CommandReloader<R> {
    /// Creates a reloader running `program args...` through `runner`.
    pub fn new<I, S>(runner: R, program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            runner,
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// `sysctl --system`: reloads every file under the sysctl.d directories.
    pub fn sysctl(runner: R) -> Self {
        Self::new(runner, "sysctl", ["--system"])
    }

    /// `resolvconf -u`: regenerates `/etc/resolv.conf` from its fragments.
    pub fn resolvconf(runner: R) -> Self {
        Self::new(runner, "resolvconf", ["-u"])
    }

    /// The full command line.
    #[must_use]
    pub fn command_line(&self) -> String {
        let args: Vec<&str> = self.args.iter().map(String::as_str).collect();
        command_line(&self.program, &args)
    }
}

impl<R: CommandRunner> Reloader for CommandReloader<R> {
    fn apply(&self) -> Result<()> {
        let args: Vec<&str> = self.args.iter().map(String::as_str).collect();
        let code = self.runner.run(&self.program, &args)?;
        if code != 0 {
            return Err(PatchError::ReloadCommandFailed {
                command: self.command_line(),
                code,
            });
        }
        tracing::info!(command = %self.command_line(), "Reload command succeeded");
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingRunner;
    use super::*;

    #[test]
    fn command_reloader_runs_once() {
        let runner = RecordingRunner::new();
        CommandReloader::sysctl(&runner).apply().unwrap();
        assert_eq!(runner.calls(), vec!["sysctl --system"]);
    }

    #[test]
    fn non_zero_exit_is_reload_failure() {
        let runner = RecordingRunner::new().with_code("resolvconf -u", 3);
        let err = CommandReloader::resolvconf(&runner).apply().unwrap_err();
        match err {
            PatchError::ReloadCommandFailed { command, code } => {
                assert_eq!(command, "resolvconf -u");
                assert_eq!(code, 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn closures_are_reloaders() {
        let hits = std::cell::Cell::new(0);
        let reloader = || -> Result<()> {
            hits.set(hits.get() + 1);
            Ok(())
        };
        reloader.apply().unwrap();
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn system_runner_reports_exit_codes() {
        assert_eq!(SystemRunner.run("true", &[]).unwrap(), 0);
        assert_eq!(SystemRunner.run("false", &[]).unwrap(), 1);
        assert!(SystemRunner.run("/nonexistent/vpn-optimizer-test", &[]).is_err());
    }
}
