//! Integration tests for `vpn-optimizer`.
//!
//! Tests marked `#[ignore]` require root:
//!
//! ```bash
//! sudo cargo test -- --ignored
//! ```

use std::cell::Cell;
use std::path::Path;

use vpn_optimizer::{
    DnsBackend, DnsConfig, DnsPatcher, MarkerState, MarkeredFile, Outcome, PatchError, Patcher,
    SettingsBlock,
};

fn mark_block() -> SettingsBlock {
    SettingsBlock::new("#MARK").with_line("net.ipv4.tcp_window_scaling = 1")
}

fn count_lines(path: &Path, line: &str) -> usize {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .filter(|l| *l == line)
        .count()
}

/// Stands in for `resolvconf -u`: the generated file is a header, the
/// `head` fragment, then the `base` nameservers.
fn fake_resolvconf<'a>(
    head: &'a Path,
    merged: &'a Path,
    base: &'a str,
) -> impl Fn() -> vpn_optimizer::Result<()> + 'a {
    move || {
        let head = std::fs::read_to_string(head)?;
        std::fs::write(merged, format!("# Generated by resolvconf\n{head}{base}"))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Markered block lifecycle
// ---------------------------------------------------------------------------

#[test]
fn end_to_end_install_and_uninstall() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("99-vpn-optimizer.conf");
    let patcher = Patcher::new(MarkeredFile::new(&path), mark_block());
    let reloads = Cell::new(0);
    let reloader = || -> vpn_optimizer::Result<()> {
        reloads.set(reloads.get() + 1);
        Ok(())
    };

    assert_eq!(patcher.install(true, &reloader).unwrap(), Outcome::Installed);
    assert_eq!(count_lines(&path, "#MARK"), 1);
    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    let at = lines.iter().position(|l| *l == "#MARK").unwrap();
    assert_eq!(lines[at + 1], "net.ipv4.tcp_window_scaling = 1");

    assert_eq!(patcher.uninstall(true, &reloader).unwrap(), Outcome::Removed);
    assert_eq!(count_lines(&path, "#MARK"), 0);
    assert_eq!(reloads.get(), 2);
}

#[test]
fn idempotent_install() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.conf");
    let patcher = Patcher::new(MarkeredFile::new(&path).without_backups(), mark_block());
    let reloads = Cell::new(0);
    let reloader = || -> vpn_optimizer::Result<()> {
        reloads.set(reloads.get() + 1);
        Ok(())
    };

    patcher.install(true, &reloader).unwrap();
    let first = std::fs::read_to_string(&path).unwrap();

    assert_eq!(patcher.install(true, &reloader).unwrap(), Outcome::AlreadyInstalled);
    assert_eq!(patcher.status().unwrap(), MarkerState::Present);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), first);
    assert_eq!(reloads.get(), 1);
}

#[test]
fn round_trip_restores_existing_content() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.conf");
    let original = "# operator settings\nvm.swappiness = 10\nfs.file-max = 2097152\n";
    std::fs::write(&path, original).unwrap();

    let patcher = Patcher::new(MarkeredFile::new(&path), mark_block());
    let noop = vpn_optimizer::NoopReloader;
    patcher.install(true, &noop).unwrap();
    patcher.uninstall(true, &noop).unwrap();

    assert_eq!(std::fs::read_to_string(&path).unwrap(), original);
}

#[test]
fn uninstall_when_absent_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.conf");
    std::fs::write(&path, "vm.swappiness = 10\n").unwrap();
    let patcher = Patcher::new(MarkeredFile::new(&path), mark_block());

    let reloader = || -> vpn_optimizer::Result<()> { panic!("nothing to reload") };
    assert_eq!(patcher.uninstall(true, &reloader).unwrap(), Outcome::NotInstalled);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "vm.swappiness = 10\n");

    // No backup either, since nothing was mutated.
    let entries: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().contains(".bak-"))
        .collect();
    assert!(entries.is_empty());
}

#[test]
fn duplicated_sentinel_blocks_everything() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.conf");
    let content = "#MARK\nnet.ipv4.tcp_window_scaling = 1\n#MARK\n";
    std::fs::write(&path, content).unwrap();
    let patcher = Patcher::new(MarkeredFile::new(&path), mark_block());
    let noop = vpn_optimizer::NoopReloader;

    assert_eq!(
        patcher.status().unwrap(),
        MarkerState::Inconsistent { count: 2 }
    );
    assert!(matches!(
        patcher.install(true, &noop),
        Err(PatchError::InconsistentMarkerState { count: 2, .. })
    ));
    assert!(matches!(
        patcher.uninstall(true, &noop),
        Err(PatchError::InconsistentMarkerState { count: 2, .. })
    ));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), content);
}

// ---------------------------------------------------------------------------
// DNS ordering
// ---------------------------------------------------------------------------

#[test]
fn dns_primary_precedes_secondary() {
    let dir = tempfile::tempdir().unwrap();
    let head = dir.path().join("head");
    let merged = dir.path().join("resolv.conf");
    let backend = DnsBackend::Resolvconf {
        head: head.clone(),
        merged: merged.clone(),
    };
    let dns = DnsPatcher::new(backend, DnsConfig::new("1.1.1.1", "8.8.8.8").unwrap());

    let reloader = fake_resolvconf(&head, &merged, "nameserver 192.168.1.1\n");
    assert_eq!(dns.install(true, &reloader).unwrap(), Outcome::Installed);

    let out = std::fs::read_to_string(&merged).unwrap();
    let nameservers: Vec<&str> = out.lines().filter(|l| l.starts_with("nameserver")).collect();
    assert_eq!(
        nameservers,
        vec!["nameserver 1.1.1.1", "nameserver 8.8.8.8", "nameserver 192.168.1.1"]
    );
}

#[test]
fn dns_swapped_inputs_swap_order() {
    let dir = tempfile::tempdir().unwrap();
    let head = dir.path().join("head");
    let merged = dir.path().join("resolv.conf");
    let backend = DnsBackend::Resolvconf {
        head: head.clone(),
        merged: merged.clone(),
    };
    let dns = DnsPatcher::new(backend, DnsConfig::new("8.8.8.8", "1.1.1.1").unwrap());

    dns.install(true, &fake_resolvconf(&head, &merged, "")).unwrap();

    let order = dns.verify().unwrap();
    assert!(order.primary_line < order.secondary_line);
    let out = std::fs::read_to_string(&merged).unwrap();
    let first = out.lines().find(|l| l.starts_with("nameserver")).unwrap();
    assert_eq!(first, "nameserver 8.8.8.8");
}

#[test]
fn dns_reordering_merge_fails_loudly() {
    let dir = tempfile::tempdir().unwrap();
    let head = dir.path().join("head");
    let merged = dir.path().join("resolv.conf");
    let backend = DnsBackend::Resolvconf {
        head: head.clone(),
        merged: merged.clone(),
    };
    let dns = DnsPatcher::new(backend, DnsConfig::default());

    let reversing = || -> vpn_optimizer::Result<()> {
        let head = std::fs::read_to_string(&head)?;
        let mut lines: Vec<&str> = head.lines().filter(|l| l.starts_with("nameserver")).collect();
        lines.reverse();
        std::fs::write(&merged, lines.join("\n") + "\n")?;
        Ok(())
    };

    assert!(matches!(
        dns.install(true, &reversing),
        Err(PatchError::VerificationFailed(_))
    ));
}

#[test]
fn dns_dropping_merge_fails_loudly() {
    let dir = tempfile::tempdir().unwrap();
    let head = dir.path().join("head");
    let merged = dir.path().join("resolv.conf");
    let backend = DnsBackend::Resolvconf {
        head,
        merged: merged.clone(),
    };
    let dns = DnsPatcher::new(backend, DnsConfig::default());

    let dropping = || -> vpn_optimizer::Result<()> {
        std::fs::write(&merged, "nameserver 1.1.1.1\n")?;
        Ok(())
    };

    let err = dns.install(true, &dropping).unwrap_err();
    assert!(err.to_string().contains("8.8.8.8"));
}

#[test]
fn dns_direct_refuses_resolver_with_nameservers() {
    let dir = tempfile::tempdir().unwrap();
    let resolv = dir.path().join("resolv.conf");
    let original = "nameserver 127.0.0.53\nnameserver 10.0.0.1\nnameserver 10.0.0.2\n";
    std::fs::write(&resolv, original).unwrap();
    let dns = DnsPatcher::new(
        DnsBackend::Direct {
            resolv_conf: resolv.clone(),
        },
        DnsConfig::default(),
    );

    assert!(matches!(
        dns.install(true, &vpn_optimizer::NoopReloader),
        Err(PatchError::VerificationFailed(_))
    ));
    assert_eq!(std::fs::read_to_string(&resolv).unwrap(), original);

    // A resolver file edited after install fails verification too.
    std::fs::write(
        &resolv,
        "nameserver 127.0.0.53\n\n# vpn-optimizer dns\nnameserver 1.1.1.1\nnameserver 8.8.8.8\n",
    )
    .unwrap();
    let err = dns.install(true, &vpn_optimizer::NoopReloader).unwrap_err();
    assert!(err.to_string().contains("127.0.0.53"));
}

#[test]
fn dns_uninstall_restores_head() {
    let dir = tempfile::tempdir().unwrap();
    let head = dir.path().join("head");
    let merged = dir.path().join("resolv.conf");
    std::fs::write(&head, "# Dynamic resolv.conf(5) file for glibc resolver(3)\n").unwrap();
    let backend = DnsBackend::Resolvconf {
        head: head.clone(),
        merged: merged.clone(),
    };
    let dns = DnsPatcher::new(backend, DnsConfig::default());
    let reloader = fake_resolvconf(&head, &merged, "");

    dns.install(true, &reloader).unwrap();
    assert_eq!(dns.uninstall(true, &reloader).unwrap(), Outcome::Removed);

    assert_eq!(
        std::fs::read_to_string(&head).unwrap(),
        "# Dynamic resolv.conf(5) file for glibc resolver(3)\n"
    );
    assert!(!std::fs::read_to_string(&merged).unwrap().contains("nameserver"));
}

// ---------------------------------------------------------------------------
// Root-only tests
// ---------------------------------------------------------------------------

#[test]
#[ignore = "requires root to write /etc/sysctl.d and run sysctl"]
fn real_sysctl_install_and_uninstall() {
    use vpn_optimizer::sysctl::{SYSCTL_CONF_PATH, vpn_block};
    use vpn_optimizer::{CommandReloader, SystemRunner};

    let patcher = Patcher::new(MarkeredFile::new(SYSCTL_CONF_PATH), vpn_block());
    let reloader = CommandReloader::sysctl(SystemRunner);

    patcher.install(true, &reloader).unwrap();
    assert_eq!(patcher.status().unwrap(), MarkerState::Present);

    patcher.uninstall(true, &reloader).unwrap();
    assert_eq!(patcher.status().unwrap(), MarkerState::Absent);
}
