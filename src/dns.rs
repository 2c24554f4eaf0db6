//! Ordered nameserver entries.
//!
//! The DNS profile installs `nameserver <primary>` followed by
//! `nameserver <secondary>` as a markered block, regenerates the resolver
//! file, and then checks the generated output: the primary must be the first
//! nameserver and the secondary must follow it. A merge step that drops or
//! reorders an entry is a hard failure.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use crate::config::{DnsConfig, SettingsBlock};
use crate::error::{PatchError, Result};
use crate::patcher::{MarkerState, MarkeredFile, Outcome, Patcher};
use crate::reload::{CommandRunner, Reloader};
use crate::services::{HostServices, UnitAction};

/// Sentinel line above the nameserver block.
pub const DNS_SENTINEL: &str = "# vpn-optimizer dns";

/// Primary and secondary.
const DNS_BLOCK_LINES: usize = 2;

/// resolvconf fragment prepended to the generated resolver file.
pub const RESOLVCONF_HEAD_PATH: &str = "/etc/resolvconf/resolv.conf.d/head";

/// The resolver file read by libc.
pub const RESOLV_CONF_PATH: &str = "/etc/resolv.conf";

/// Package providing `resolvconf`.
pub const RESOLVCONF_PACKAGE: &str = "resolvconf";

/// Unit name of the resolvconf service.
pub const RESOLVCONF_UNIT: &str = "resolvconf";

/// Unit that competes with resolvconf for `/etc/resolv.conf`.
pub const SYSTEMD_RESOLVED_UNIT: &str = "systemd-resolved";

/// Where the block goes and where the merged result is read back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsBackend {
    /// Block in a resolvconf fragment; `resolvconf -u` writes `merged`.
    Resolvconf {
        /// Fragment receiving the block.
        head: PathBuf,
        /// Generated resolver file.
        merged: PathBuf,
    },
    /// Block written straight into the resolver file.
    Direct {
        /// The resolver file.
        resolv_conf: PathBuf,
    },
}

impl DnsBackend {
    /// resolvconf backend at the standard paths.
    #[must_use]
    pub fn resolvconf() -> Self {
        Self::Resolvconf {
            head: PathBuf::from(RESOLVCONF_HEAD_PATH),
            merged: PathBuf::from(RESOLV_CONF_PATH),
        }
    }

    /// Direct backend at `/etc/resolv.conf`.
    #[must_use]
    pub fn direct() -> Self {
        Self::Direct {
            resolv_conf: PathBuf::from(RESOLV_CONF_PATH),
        }
    }

    /// File that receives the block.
    #[must_use]
    pub fn target(&self) -> &Path {
        match self {
            Self::Resolvconf { head, .. } => head,
            Self::Direct { resolv_conf } => resolv_conf,
        }
    }

    /// File whose nameserver order is verified.
    #[must_use]
    pub fn merged(&self) -> &Path {
        match self {
            Self::Resolvconf { merged, .. } => merged,
            Self::Direct { resolv_conf } => resolv_conf,
        }
    }
}

/// Line numbers (1-based) found by [`verify_order`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameserverOrder {
    /// Line of the primary nameserver.
    pub primary_line: usize,
    /// Line of the secondary nameserver.
    pub secondary_line: usize,
}

/// Nameserver block for `config`.
#[must_use]
pub fn dns_block(config: &DnsConfig) -> SettingsBlock {
    SettingsBlock::new(DNS_SENTINEL).with_lines(config.nameserver_lines())
}

/// Checks that the primary is the first nameserver in `merged` and that the
/// secondary follows it.
///
/// # Errors
///
/// Returns [`PatchError::VerificationFailed`] if either address is missing,
/// the secondary comes first, or another nameserver precedes the primary.
pub fn verify_order(merged: &str, config: &DnsConfig) -> Result<NameserverOrder> {
    let nameservers: Vec<(usize, IpAddr)> = merged
        .lines()
        .enumerate()
        .filter_map(|(i, line)| parse_nameserver(line).map(|addr| (i + 1, addr)))
        .collect();

    let line_of = |addr: IpAddr, role: &str| {
        nameservers
            .iter()
            .find(|(_, a)| *a == addr)
            .map(|(n, _)| *n)
            .ok_or_else(|| {
                PatchError::VerificationFailed(format!(
                    "{role} nameserver {addr} is missing from the resolver output"
                ))
            })
    };
    let primary_line = line_of(config.primary, "primary")?;
    let secondary_line = line_of(config.secondary, "secondary")?;

    if primary_line >= secondary_line {
        return Err(PatchError::VerificationFailed(format!(
            "nameserver {} (line {primary_line}) must come before {} (line {secondary_line})",
            config.primary, config.secondary
        )));
    }

    if let Some((line, first)) = nameservers.first().filter(|(_, a)| *a != config.primary) {
        return Err(PatchError::VerificationFailed(format!(
            "nameserver {first} (line {line}) is queried before the primary {}",
            config.primary
        )));
    }

    Ok(NameserverOrder {
        primary_line,
        secondary_line,
    })
}

/// Refuses to append behind nameservers the resolver would query first.
fn ensure_no_nameservers(content: &str, path: &Path) -> Result<()> {
    match content.lines().find_map(parse_nameserver) {
        Some(addr) => Err(PatchError::VerificationFailed(format!(
            "{} already lists nameserver {addr}, which would be queried first; \
             remove it or use the resolvconf backend",
            path.display()
        ))),
        None => Ok(()),
    }
}

/// The installed nameserver block, read back from `content`.
///
/// Only the first lines of the block region are taken, as many as a block
/// holds, and only while they are `nameserver <ip>` lines. Anything after
/// them stays in the file as a stray line.
fn installed_block(content: &str) -> Option<SettingsBlock> {
    let lines: Vec<String> = content
        .lines()
        .skip_while(|l| *l != DNS_SENTINEL)
        .skip(1)
        .take(DNS_BLOCK_LINES)
        .take_while(|l| parse_nameserver(l).is_some())
        .map(str::to_string)
        .collect();
    (lines.len() == DNS_BLOCK_LINES).then(|| SettingsBlock::new(DNS_SENTINEL).with_lines(lines))
}

fn parse_nameserver(line: &str) -> Option<IpAddr> {
    let mut tokens = line.split_whitespace();
    if tokens.next()? != "nameserver" {
        return None;
    }
    tokens.next()?.parse().ok()
}

/// Hands `/etc/resolv.conf` over to resolvconf.
///
/// Installs the package when missing, stops, disables and masks
/// `systemd-resolved` when it is running, then enables and restarts the
/// resolvconf service.
///
/// # Errors
///
/// Returns [`PatchError::CommandFailed`] for the first failing command.
pub fn prepare_resolvconf<R: CommandRunner>(host: &HostServices<R>) -> Result<()> {
    if !host.is_package_installed(RESOLVCONF_PACKAGE)? {
        host.install_package(RESOLVCONF_PACKAGE)?;
    }
    if host.is_active(SYSTEMD_RESOLVED_UNIT)? {
        host.systemctl(UnitAction::Stop, SYSTEMD_RESOLVED_UNIT)?;
        host.systemctl(UnitAction::Disable, SYSTEMD_RESOLVED_UNIT)?;
        host.systemctl(UnitAction::Mask, SYSTEMD_RESOLVED_UNIT)?;
    }
    host.systemctl(UnitAction::Enable, RESOLVCONF_UNIT)?;
    host.systemctl(UnitAction::Restart, RESOLVCONF_UNIT)
}

/// Gives `/etc/resolv.conf` back to `systemd-resolved`.
///
/// # Errors
///
/// Returns [`PatchError::CommandFailed`] for the first failing command.
pub fn restore_systemd_resolved<R: CommandRunner>(host: &HostServices<R>) -> Result<()> {
    host.systemctl(UnitAction::Unmask, SYSTEMD_RESOLVED_UNIT)?;
    host.systemctl(UnitAction::Enable, SYSTEMD_RESOLVED_UNIT)?;
    host.systemctl(UnitAction::Restart, SYSTEMD_RESOLVED_UNIT)
}

/// Installs, removes and verifies the nameserver block.
#[derive(Debug, Clone)]
pub struct DnsPatcher {
    backend: DnsBackend,
    config: DnsConfig,
    backups: bool,
}

impl DnsPatcher {
    /// Manages `config` through `backend`.
    #[must_use]
    pub const fn new(backend: DnsBackend, config: DnsConfig) -> Self {
        Self {
            backend,
            config,
            backups: true,
        }
    }

    /// Disables pre-mutation backups.
    #[must_use]
    pub const fn without_backups(mut self) -> Self {
        self.backups = false;
        self
    }

    /// Returns the backend.
    #[must_use]
    pub const fn backend(&self) -> &DnsBackend {
        &self.backend
    }

    /// Returns the requested nameservers.
    #[must_use]
    pub const fn config(&self) -> &DnsConfig {
        &self.config
    }

    /// Installed state of the block.
    ///
    /// # Errors
    ///
    /// Returns [`PatchError::Io`] if the target cannot be read.
    pub fn status(&self) -> Result<MarkerState> {
        self.file().detect(DNS_SENTINEL)
    }

    /// Installs the block, runs `reloader`, then verifies the order in the
    /// merged output.
    ///
    /// Verification also runs when the block was already installed, so a
    /// drifted resolver file is reported rather than silently accepted.
    ///
    /// # Errors
    ///
    /// Returns [`PatchError::VerificationFailed`] if the merged output
    /// drops or reorders an entry, plus any [`Patcher::install`] error.
    pub fn install(&self, confirmed: bool, reloader: &dyn Reloader) -> Result<Outcome> {
        self.install_with(confirmed, reloader, || Ok(()))
    }

    /// Like [`DnsPatcher::install`], running `before_write` under the target
    /// lock once the block is known to be absent and the change confirmed.
    ///
    /// The `Direct` backend appends behind whatever the file already holds,
    /// so it refuses a resolver file that already lists a nameserver.
    ///
    /// # Errors
    ///
    /// Same as [`DnsPatcher::install`], plus whatever `before_write` returns.
    pub fn install_with<F>(
        &self,
        confirmed: bool,
        reloader: &dyn Reloader,
        before_write: F,
    ) -> Result<Outcome>
    where
        F: FnOnce() -> Result<()>,
    {
        let patcher = Patcher::new(self.file(), dns_block(&self.config));
        let _lock = patcher.lock()?;

        let outcome = patcher.install_locked(confirmed, reloader, || {
            if let DnsBackend::Direct { resolv_conf } = &self.backend {
                ensure_no_nameservers(&patcher.file().read()?, resolv_conf)?;
            }
            before_write()
        })?;

        if matches!(outcome, Outcome::Installed | Outcome::AlreadyInstalled) {
            let order = self.verify()?;
            tracing::info!(
                primary = %self.config.primary,
                primary_line = order.primary_line,
                secondary = %self.config.secondary,
                secondary_line = order.secondary_line,
                "Nameserver order verified"
            );
        }
        Ok(outcome)
    }

    /// Removes the installed nameserver block and runs `reloader`.
    ///
    /// The block is read back from the target under the lock, so addresses
    /// installed under an earlier override are removed too. Nameserver lines
    /// added below the block by hand are left in place.
    ///
    /// # Errors
    ///
    /// Any [`Patcher::uninstall`] error.
    pub fn uninstall(&self, confirmed: bool, reloader: &dyn Reloader) -> Result<Outcome> {
        let file = self.file();
        let requested = Patcher::new(file.clone(), dns_block(&self.config));
        let _lock = requested.lock()?;

        match installed_block(&file.read()?) {
            Some(block) => Patcher::new(file, block).uninstall_locked(confirmed, reloader),
            None => requested.uninstall_locked(confirmed, reloader),
        }
    }

    /// Reads the merged output and checks the nameserver order.
    ///
    /// # Errors
    ///
    /// Same as [`verify_order`], plus [`PatchError::Io`] if the merged file
    /// cannot be read.
    pub fn verify(&self) -> Result<NameserverOrder> {
        let merged = std::fs::read_to_string(self.backend.merged())?;
        verify_order(&merged, &self.config)
    }

    fn file(&self) -> MarkeredFile {
        let file = MarkeredFile::new(self.backend.target());
        if self.backups {
            file
        } else {
            file.without_backups()
        }
    }
}
