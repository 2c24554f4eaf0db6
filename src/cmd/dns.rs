use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Args, Subcommand};
use vpn_optimizer::dns::{
    self, RESOLV_CONF_PATH, RESOLVCONF_HEAD_PATH, RESOLVCONF_PACKAGE,
};
use vpn_optimizer::{
    CommandReloader, DnsBackend, DnsConfig, DnsPatcher, HostServices, MarkerState, NoopReloader,
    Outcome, Reloader, SystemRunner,
};

use super::{Context, ensure_consistent, report_outcome, report_state};
use crate::output::{print_banner, print_info, print_success, print_warning};

#[derive(Args, Debug)]
pub struct DnsArgs {
    #[command(subcommand)]
    action: Action,

    /// Write nameservers straight into the resolver file instead of a
    /// resolvconf fragment
    #[arg(long, global = true)]
    direct: bool,

    /// resolvconf fragment receiving the nameservers
    #[arg(long, global = true, default_value = RESOLVCONF_HEAD_PATH)]
    head: PathBuf,

    /// Resolver file whose nameserver order is checked
    #[arg(long, global = true, default_value = RESOLV_CONF_PATH)]
    resolv_conf: PathBuf,

    /// Skip the timestamped backup before changing the file
    #[arg(long, global = true)]
    no_backup: bool,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Add the nameservers, regenerate the resolver file and verify order
    Install {
        /// Do not install resolvconf or touch systemd-resolved
        #[arg(long)]
        skip_services: bool,
    },
    /// Remove the nameservers and regenerate the resolver file
    Uninstall {
        /// Unmask, enable and restart systemd-resolved afterwards
        #[arg(long)]
        restore_resolved: bool,

        /// Remove the resolvconf package afterwards
        #[arg(long)]
        remove_package: bool,
    },
    /// Show whether the nameservers are installed and in order
    Status,
}

pub fn run(ctx: &Context, args: DnsArgs) -> Result<()> {
    let backend = if args.direct {
        DnsBackend::Direct {
            resolv_conf: args.resolv_conf.clone(),
        }
    } else {
        DnsBackend::Resolvconf {
            head: args.head.clone(),
            merged: args.resolv_conf.clone(),
        }
    };

    match args.action {
        Action::Install { skip_services } => {
            let config = DnsConfig::from_env().context("reading DNS overrides")?;
            install(ctx, &patcher(backend, config, args.no_backup), skip_services)
        }
        Action::Uninstall {
            restore_resolved,
            remove_package,
        } => {
            let config = DnsConfig::from_env().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Ignoring invalid DNS override for uninstall");
                DnsConfig::default()
            });
            uninstall(
                ctx,
                &patcher(backend, config, args.no_backup),
                restore_resolved,
                remove_package,
            )
        }
        Action::Status => {
            let config = DnsConfig::from_env().context("reading DNS overrides")?;
            status(&patcher(backend, config, args.no_backup))
        }
    }
}

fn patcher(backend: DnsBackend, config: DnsConfig, no_backup: bool) -> DnsPatcher {
    let patcher = DnsPatcher::new(backend, config);
    if no_backup {
        patcher.without_backups()
    } else {
        patcher
    }
}

fn reloader(backend: &DnsBackend) -> Box<dyn Reloader> {
    match backend {
        DnsBackend::Resolvconf { .. } => Box::new(CommandReloader::resolvconf(SystemRunner)),
        DnsBackend::Direct { .. } => Box::new(NoopReloader),
    }
}

fn install(ctx: &Context, dns: &DnsPatcher, skip_services: bool) -> Result<()> {
    print_banner("DNS ordering: install");
    ctx.require_host()?;

    let config = dns.config();
    print_info(&format!(
        "Primary {}, secondary {}",
        config.primary, config.secondary
    ));

    let backend = dns.backend();
    let state = dns.status()?;
    ensure_consistent(state, backend.target())?;

    let confirmed = state == MarkerState::Absent
        && ctx.confirm(&format!(
            "Add nameservers to {}?",
            backend.target().display()
        ))?;

    let handover = matches!(backend, DnsBackend::Resolvconf { .. }) && !skip_services;
    let outcome = dns
        .install_with(confirmed, reloader(backend).as_ref(), || {
            if handover {
                dns::prepare_resolvconf(&HostServices::new(SystemRunner))?;
            }
            Ok(())
        })
        .with_context(|| format!("installing nameservers in {}", backend.target().display()))?;
    report_outcome(outcome, backend.target());

    if matches!(outcome, Outcome::Installed | Outcome::AlreadyInstalled) {
        print_success(&format!(
            "{} is the first nameserver in {}, followed by {}",
            config.primary,
            backend.merged().display(),
            config.secondary
        ));
    }
    Ok(())
}

fn uninstall(
    ctx: &Context,
    dns: &DnsPatcher,
    restore_resolved: bool,
    remove_package: bool,
) -> Result<()> {
    print_banner("DNS ordering: uninstall");
    ctx.require_host()?;

    let backend = dns.backend();
    let state = dns.status()?;
    ensure_consistent(state, backend.target())?;

    let confirmed = state == MarkerState::Present
        && ctx.confirm(&format!(
            "Remove nameservers from {}?",
            backend.target().display()
        ))?;

    let outcome = dns
        .uninstall(confirmed, reloader(backend).as_ref())
        .with_context(|| format!("removing nameservers from {}", backend.target().display()))?;
    report_outcome(outcome, backend.target());

    if outcome != Outcome::Removed {
        if restore_resolved || remove_package {
            print_warning("Nothing was removed, leaving services as they are");
        }
        return Ok(());
    }

    let host = HostServices::new(SystemRunner);
    if restore_resolved {
        dns::restore_systemd_resolved(&host).context("restoring systemd-resolved")?;
        print_success("systemd-resolved restored");
    }
    if remove_package {
        host.remove_package(RESOLVCONF_PACKAGE)
            .context("removing resolvconf")?;
        print_success("resolvconf removed");
    }
    Ok(())
}

fn status(dns: &DnsPatcher) -> Result<()> {
    let backend = dns.backend();
    let state = dns.status()?;
    report_state(state, backend.target())?;

    if state == MarkerState::Present {
        let order = dns
            .verify()
            .with_context(|| format!("checking {}", backend.merged().display()))?;
        print_success(&format!(
            "{} on line {}, {} on line {} of {}",
            dns.config().primary,
            order.primary_line,
            dns.config().secondary,
            order.secondary_line,
            backend.merged().display()
        ));
    }
    Ok(())
}
