//! The VPN optimizer sysctl profile.
//!
//! Installed as a markered block in a `sysctl.d` drop-in and loaded with
//! `sysctl --system`. After loading, the live values under `/proc/sys` can be
//! compared against the block to spot settings the kernel refused.

use std::path::Path;

use crate::config::SettingsBlock;
use crate::error::{PatchError, Result};

/// Drop-in file holding the block.
pub const SYSCTL_CONF_PATH: &str = "/etc/sysctl.d/99-vpn-optimizer.conf";

/// Sentinel line above the block.
pub const SYSCTL_SENTINEL: &str = "# vpn-optimizer sysctl";

/// Default root of the live kernel parameter tree.
pub const PROC_SYS_ROOT: &str = "/proc/sys";

/// Kernel parameters for a VPN gateway: BBR with `fq`, large socket buffers,
/// forwarding, and path MTU handling for tunnelled traffic.
const VPN_SETTINGS: &[(&str, &str)] = &[
    ("net.core.default_qdisc", "fq"),
    ("net.ipv4.tcp_congestion_control", "bbr"),
    ("net.ipv4.tcp_window_scaling", "1"),
    ("net.ipv4.tcp_fastopen", "3"),
    ("net.ipv4.tcp_mtu_probing", "1"),
    ("net.ipv4.tcp_slow_start_after_idle", "0"),
    ("net.ipv4.tcp_notsent_lowat", "16384"),
    ("net.core.rmem_max", "67108864"),
    ("net.core.wmem_max", "67108864"),
    ("net.ipv4.tcp_rmem", "4096 87380 67108864"),
    ("net.ipv4.tcp_wmem", "4096 65536 67108864"),
    ("net.core.netdev_max_backlog", "250000"),
    ("net.ipv4.ip_forward", "1"),
    ("net.ipv6.conf.all.forwarding", "1"),
];

/// One `key = value` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysctlSetting {
    /// Dotted parameter name (e.g. `net.ipv4.ip_forward`).
    pub key: String,
    /// Value with internal whitespace collapsed to single spaces.
    pub value: String,
}

impl SysctlSetting {
    /// Parses a sysctl.d line. Blank lines and `#`/`;` comments yield
    /// `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`PatchError::InvalidConfig`] for a non-comment line without
    /// `=` or with an empty key.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            return Ok(None);
        }
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| PatchError::InvalidConfig(format!("not a sysctl assignment: {line:?}")))?;
        let key = key.trim().trim_start_matches('-');
        if key.is_empty() {
            return Err(PatchError::InvalidConfig(format!("missing sysctl key: {line:?}")));
        }
        // sysctl(8) swaps the separators, keeping `eth0.100` one component.
        let key = if key.contains('/') {
            swap_separators(key.trim_start_matches('/'))
        } else {
            key.to_string()
        };
        Ok(Some(Self {
            key,
            value: normalize(value),
        }))
    }

    /// Path of this parameter under `proc_root`.
    #[must_use]
    pub fn proc_path(&self, proc_root: &Path) -> std::path::PathBuf {
        proc_root.join(swap_separators(&self.key))
    }

    /// Renders the canonical `key = value` line.
    #[must_use]
    pub fn to_line(&self) -> String {
        format!("{} = {}", self.key, self.value)
    }
}

/// A parameter whose live value differs from the block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    /// Dotted parameter name.
    pub key: String,
    /// Value from the block.
    pub expected: String,
    /// Live value, or `None` if the parameter does not exist on this kernel.
    pub actual: Option<String>,
}

/// The VPN optimizer block.
///
/// # Example
///
/// ```
/// let block = vpn_optimizer::sysctl::vpn_block();
/// assert!(block.lines.contains(&"net.ipv4.tcp_window_scaling = 1".to_string()));
/// ```
#[must_use]
pub fn vpn_block() -> SettingsBlock {
    SettingsBlock::new(SYSCTL_SENTINEL).with_lines(
        VPN_SETTINGS
            .iter()
            .map(|(key, value)| format!("{key} = {value}")),
    )
}

/// Parses every assignment in `block`.
///
/// # Errors
///
/// Returns the first [`SysctlSetting::parse`] error.
pub fn settings(block: &SettingsBlock) -> Result<Vec<SysctlSetting>> {
    block
        .lines
        .iter()
        .filter_map(|l| SysctlSetting::parse(l).transpose())
        .collect()
}

/// Compares each setting in `block` with its live value under `proc_root`.
///
/// # Errors
///
/// Returns [`PatchError::InvalidConfig`] if the block does not parse, or
/// [`PatchError::Io`] for read errors other than a missing parameter.
pub fn verify_live(block: &SettingsBlock, proc_root: &Path) -> Result<Vec<Mismatch>> {
    let mut mismatches = Vec::new();
    for setting in settings(block)? {
        let actual = match std::fs::read_to_string(setting.proc_path(proc_root)) {
            Ok(v) => Some(normalize(&v)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        if actual.as_deref() != Some(setting.value.as_str()) {
            tracing::warn!(
                key = %setting.key,
                expected = %setting.value,
                actual = actual.as_deref().unwrap_or("<missing>"),
                "Live sysctl value differs"
            );
            mismatches.push(Mismatch {
                key: setting.key,
                expected: setting.value,
                actual,
            });
        }
    }
    Ok(mismatches)
}

fn swap_separators(key: &str) -> String {
    key.chars()
        .map(|c| match c {
            '.' => '/',
            '/' => '.',
            c => c,
        })
        .collect()
}

fn normalize(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_handles_comments_and_spacing() {
        assert_eq!(SysctlSetting::parse("# comment").unwrap(), None);
        assert_eq!(SysctlSetting::parse("  ").unwrap(), None);

        let s = SysctlSetting::parse("net.ipv4.tcp_rmem =  4096\t87380   67108864 ")
            .unwrap()
            .unwrap();
        assert_eq!(s.key, "net.ipv4.tcp_rmem");
        assert_eq!(s.value, "4096 87380 67108864");
        assert_eq!(s.to_line(), "net.ipv4.tcp_rmem = 4096 87380 67108864");
    }

    #[test]
    fn parse_accepts_slash_keys_and_ignore_prefix() {
        let s = SysctlSetting::parse("-net/ipv4/ip_forward=1").unwrap().unwrap();
        assert_eq!(s.key, "net.ipv4.ip_forward");
        assert_eq!(s.proc_path(Path::new("/proc/sys")), Path::new("/proc/sys/net/ipv4/ip_forward"));
    }

    #[test]
    fn dotted_interface_names_keep_their_component() {
        let root = Path::new("/proc/sys");
        let slash = SysctlSetting::parse("net/ipv4/conf/eth0.100/rp_filter = 2")
            .unwrap()
            .unwrap();
        assert_eq!(slash.key, "net.ipv4.conf.eth0/100.rp_filter");
        assert_eq!(
            slash.proc_path(root),
            Path::new("/proc/sys/net/ipv4/conf/eth0.100/rp_filter")
        );

        let dotted = SysctlSetting::parse("net.ipv4.conf.eth0/100.rp_filter = 2")
            .unwrap()
            .unwrap();
        assert_eq!(dotted, slash);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(SysctlSetting::parse("net.ipv4.ip_forward").is_err());
        assert!(SysctlSetting::parse(" = 1").is_err());
    }

    #[test]
    fn vpn_block_is_valid_and_parses() {
        let block = vpn_block();
        block.validate().unwrap();
        assert_eq!(settings(&block).unwrap().len(), VPN_SETTINGS.len());
        assert_eq!(block.sentinel, SYSCTL_SENTINEL);
    }

    #[test]
    fn verify_live_reports_differences() {
        let root = tempfile::tempdir().unwrap();
        let write = |key: &str, value: &str| {
            let path = root.path().join(key.replace('.', "/"));
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, value).unwrap();
        };
        write("net.ipv4.tcp_window_scaling", "1\n");
        write("net.ipv4.tcp_rmem", "4096\t87380\t67108864\n");
        write("net.ipv4.tcp_congestion_control", "cubic\n");

        let block = SettingsBlock::new("#MARK").with_lines([
            "net.ipv4.tcp_window_scaling = 1",
            "net.ipv4.tcp_rmem = 4096 87380 67108864",
            "net.ipv4.tcp_congestion_control = bbr",
            "net.ipv4.tcp_fastopen = 3",
        ]);
        let mismatches = verify_live(&block, root.path()).unwrap();

        assert_eq!(
            mismatches,
            vec![
                Mismatch {
                    key: "net.ipv4.tcp_congestion_control".into(),
                    expected: "bbr".into(),
                    actual: Some("cubic".into()),
                },
                Mismatch {
                    key: "net.ipv4.tcp_fastopen".into(),
                    expected: "3".into(),
                    actual: None,
                },
            ]
        );
    }
}
