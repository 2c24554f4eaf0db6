//! # vpn-optimizer
//!
//! Idempotent, markered edits to host network configuration: a sysctl
//! tuning profile for VPN gateways and an ordered pair of DNS nameservers.
//!
//! Each profile is a block of lines tagged with a sentinel comment. The
//! sentinel is counted before every change, so running the installer twice
//! leaves a single block, and a file where the sentinel is duplicated is
//! refused instead of repaired.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use vpn_optimizer::{CommandReloader, MarkeredFile, Patcher, SystemRunner, sysctl};
//!
//! let patcher = Patcher::new(
//!     MarkeredFile::new(sysctl::SYSCTL_CONF_PATH),
//!     sysctl::vpn_block(),
//! );
//!
//! // Requires root. `confirmed` comes from the operator prompt.
//! patcher.install(true, &CommandReloader::sysctl(SystemRunner))?;
//! assert_eq!(patcher.status()?, vpn_optimizer::MarkerState::Present);
//!
//! patcher.uninstall(true, &CommandReloader::sysctl(SystemRunner))?;
//! ```
//!
//! ## Guarantees
//!
//! - Install appends and never truncates; uninstall writes a temporary file
//!   beside the target and renames it into place.
//! - The reload action runs once, after the write is synced, and only when
//!   the file changed.
//! - Every mutation holds an exclusive lock on `.<target>.lock`.
//! - A timestamped backup is taken before each mutation and never removed.
//!
//! ## Permissions
//!
//! Writing under `/etc` and running the reload commands requires root. The
//! library does not check this itself; the `vpn-optimizer` binary does.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod backup;
pub mod config;
pub mod dns;
pub mod error;
pub mod lock;
pub mod patcher;
pub mod platform;
pub mod reload;
pub mod services;
pub mod sysctl;
pub mod util;

pub use config::{DnsConfig, SettingsBlock};
pub use dns::{DnsBackend, DnsPatcher};
pub use error::{PatchError, Result};
pub use patcher::{MarkerState, MarkeredFile, Outcome, Patcher};
pub use reload::{CommandReloader, CommandRunner, NoopReloader, Reloader, SystemRunner};
pub use services::{HostServices, UnitAction};
