//! Settings block and DNS configuration.

use std::net::IpAddr;

use crate::error::{PatchError, Result};

/// Environment variable overriding the primary nameserver.
pub const DNS_PRIMARY_ENV: &str = "VPN_OPTIMIZER_DNS_PRIMARY";

/// Environment variable overriding the secondary nameserver.
pub const DNS_SECONDARY_ENV: &str = "VPN_OPTIMIZER_DNS_SECONDARY";

/// Primary nameserver used when no override is set.
pub const DEFAULT_DNS_PRIMARY: &str = "1.1.1.1";

/// Secondary nameserver used when no override is set.
pub const DEFAULT_DNS_SECONDARY: &str = "8.8.8.8";

/// An ordered group of lines installed together under one sentinel.
///
/// # Example
///
/// ```
/// use vpn_optimizer::SettingsBlock;
///
/// let block = SettingsBlock::new("#MARK")
///     .with_line("net.ipv4.tcp_window_scaling = 1");
///
/// assert_eq!(block.sentinel, "#MARK");
/// assert_eq!(block.lines, vec!["net.ipv4.tcp_window_scaling = 1"]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsBlock {
    /// Marker line written directly above the block.
    /// Must not collide with anything an operator would write by hand.
    pub sentinel: String,

    /// Lines inserted verbatim, in order.
    pub lines: Vec<String>,
}

impl SettingsBlock {
    /// Creates an empty block tagged with `sentinel`.
    #[must_use]
    pub fn new(sentinel: impl Into<String>) -> Self {
        Self {
            sentinel: sentinel.into(),
            lines: Vec::new(),
        }
    }

    /// Appends one line.
    #[must_use]
    pub fn with_line(mut self, line: impl Into<String>) -> Self {
        self.lines.push(line.into());
        self
    }

    /// Appends several lines.
    #[must_use]
    pub fn with_lines<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lines.extend(lines.into_iter().map(Into::into));
        self
    }

    /// Checks that the block can be installed and removed unambiguously.
    ///
    /// # Errors
    ///
    /// Returns [`PatchError::InvalidConfig`] if the sentinel is blank or
    /// contains a newline, or if any line contains a newline, is blank, or
    /// equals the sentinel.
    pub fn validate(&self) -> Result<()> {
        if self.sentinel.trim().is_empty() || self.sentinel.contains('\n') {
            return Err(PatchError::InvalidConfig(format!(
                "sentinel must be a single non-blank line, got {:?}",
                self.sentinel
            )));
        }
        for line in &self.lines {
            if line.contains('\n') || line.trim().is_empty() {
                return Err(PatchError::InvalidConfig(format!(
                    "block lines must be single non-blank lines, got {line:?}"
                )));
            }
            if *line == self.sentinel {
                return Err(PatchError::InvalidConfig(
                    "block lines must not repeat the sentinel".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Ordered nameserver pair for the DNS profile.
///
/// # Example
///
/// ```
/// use vpn_optimizer::DnsConfig;
///
/// let dns = DnsConfig::new("1.1.1.1", "8.8.8.8").unwrap();
/// assert_eq!(dns.primary.to_string(), "1.1.1.1");
/// assert!(DnsConfig::new("1.1.1.1", "not-an-ip").is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DnsConfig {
    /// Nameserver that must appear first in the merged output.
    pub primary: IpAddr,

    /// Nameserver that must appear after the primary.
    pub secondary: IpAddr,
}

impl DnsConfig {
    /// Parses and validates both addresses.
    ///
    /// # Errors
    ///
    /// Returns [`PatchError::InvalidConfig`] if either value is not an IPv4
    /// or IPv6 literal, or if both are the same address.
    pub fn new(primary: &str, secondary: &str) -> Result<Self> {
        let primary = parse_addr("primary", primary)?;
        let secondary = parse_addr("secondary", secondary)?;
        if primary == secondary {
            return Err(PatchError::InvalidConfig(format!(
                "primary and secondary nameserver are both {primary}"
            )));
        }
        Ok(Self { primary, secondary })
    }

    /// Reads overrides from [`DNS_PRIMARY_ENV`] and [`DNS_SECONDARY_ENV`],
    /// falling back to `1.1.1.1` and `8.8.8.8`.
    ///
    /// # Errors
    ///
    /// Same as [`DnsConfig::new`].
    pub fn from_env() -> Result<Self> {
        let primary = env_or(DNS_PRIMARY_ENV, DEFAULT_DNS_PRIMARY);
        let secondary = env_or(DNS_SECONDARY_ENV, DEFAULT_DNS_SECONDARY);
        Self::new(&primary, &secondary)
    }

    /// Nameserver lines in resolver order.
    #[must_use]
    pub fn nameserver_lines(&self) -> [String; 2] {
        [
            format!("nameserver {}", self.primary),
            format!("nameserver {}", self.secondary),
        ]
    }
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            primary: IpAddr::from([1, 1, 1, 1]),
            secondary: IpAddr::from([8, 8, 8, 8]),
        }
    }
}

fn parse_addr(role: &str, value: &str) -> Result<IpAddr> {
    value.trim().parse().map_err(|_| {
        PatchError::InvalidConfig(format!("{role} nameserver {value:?} is not an IP address"))
    })
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}
