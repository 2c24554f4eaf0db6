use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use clap::{Args, Subcommand};
use vpn_optimizer::sysctl::{self, PROC_SYS_ROOT, SYSCTL_CONF_PATH};
use vpn_optimizer::{CommandReloader, MarkerState, MarkeredFile, Outcome, Patcher, SystemRunner};

use super::{Context, ensure_consistent, report_outcome, report_state};
use crate::output::{print_banner, print_success, print_warning};

#[derive(Args, Debug)]
pub struct SysctlArgs {
    #[command(subcommand)]
    action: Action,

    /// Drop-in file holding the settings
    #[arg(long, global = true, default_value = SYSCTL_CONF_PATH)]
    file: PathBuf,

    /// Skip the timestamped backup before changing the file
    #[arg(long, global = true)]
    no_backup: bool,

    /// Root of the live kernel parameter tree
    #[arg(long, global = true, hide = true, default_value = PROC_SYS_ROOT)]
    proc_root: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Append the tuning block and run `sysctl --system`
    Install,
    /// Remove the tuning block and run `sysctl --system`
    Uninstall,
    /// Show whether the block is installed and whether the kernel applied it
    Status,
}

pub fn run(ctx: &Context, args: SysctlArgs) -> Result<()> {
    let file = if args.no_backup {
        MarkeredFile::new(&args.file).without_backups()
    } else {
        MarkeredFile::new(&args.file)
    };
    let patcher = Patcher::new(file, sysctl::vpn_block());

    match args.action {
        Action::Install => install(ctx, &patcher, &args.proc_root),
        Action::Uninstall => uninstall(ctx, &patcher),
        Action::Status => status(&patcher, &args.proc_root),
    }
}

fn install(ctx: &Context, patcher: &Patcher, proc_root: &Path) -> Result<()> {
    print_banner("VPN sysctl tuning: install");
    ctx.require_host()?;

    let path = patcher.file().path();
    let state = patcher.status()?;
    ensure_consistent(state, path)?;

    let confirmed = state == MarkerState::Absent
        && ctx.confirm(&format!(
            "Add {} kernel settings to {} and reload them?",
            patcher.block().lines.len(),
            path.display()
        ))?;

    let outcome = patcher
        .install(confirmed, &CommandReloader::sysctl(SystemRunner))
        .with_context(|| format!("installing sysctl settings in {}", path.display()))?;
    report_outcome(outcome, path);

    if outcome == Outcome::Installed {
        report_live(patcher, proc_root)?;
    }
    Ok(())
}

fn uninstall(ctx: &Context, patcher: &Patcher) -> Result<()> {
    print_banner("VPN sysctl tuning: uninstall");
    ctx.require_host()?;

    let path = patcher.file().path();
    let state = patcher.status()?;
    ensure_consistent(state, path)?;

    let confirmed = state == MarkerState::Present
        && ctx.confirm(&format!(
            "Remove the kernel settings from {} and reload?",
            path.display()
        ))?;

    let outcome = patcher
        .uninstall(confirmed, &CommandReloader::sysctl(SystemRunner))
        .with_context(|| format!("removing sysctl settings from {}", path.display()))?;
    report_outcome(outcome, path);
    Ok(())
}

fn status(patcher: &Patcher, proc_root: &Path) -> Result<()> {
    let state = patcher.status()?;
    report_state(state, patcher.file().path())?;
    if state == MarkerState::Present {
        report_live(patcher, proc_root)?;
    }
    Ok(())
}

fn report_live(patcher: &Patcher, proc_root: &Path) -> Result<()> {
    let mismatches = sysctl::verify_live(patcher.block(), proc_root)?;
    if mismatches.is_empty() {
        print_success("All kernel settings are live");
        return Ok(());
    }
    for m in mismatches {
        print_warning(&format!(
            "{} is {} (expected {})",
            m.key,
            m.actual.as_deref().unwrap_or("unavailable on this kernel"),
            m.expected
        ));
    }
    Ok(())
}
