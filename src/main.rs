use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cmd;
mod output;
mod prompts;

use cmd::Context;
use cmd::dns::DnsArgs;
use cmd::sysctl::SysctlArgs;

/// vpn-optimizer - idempotent sysctl and DNS tuning for VPN hosts
#[derive(Parser, Debug)]
#[command(name = "vpn-optimizer", version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Answer yes to confirmation prompts
    #[arg(short, long, global = true)]
    yes: bool,

    /// Make "yes" the default answer when pressing enter or when stdin is
    /// not a terminal
    #[arg(long, global = true)]
    default_yes: bool,

    /// os-release file used for platform detection
    #[arg(long, global = true, hide = true, default_value = vpn_optimizer::platform::OS_RELEASE_PATH)]
    os_release: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Kernel network tuning in /etc/sysctl.d
    Sysctl(SysctlArgs),

    /// Ordered DNS nameservers via resolvconf or /etc/resolv.conf
    ///
    /// Nameservers default to 1.1.1.1 and 8.8.8.8 and can be overridden
    /// with VPN_OPTIMIZER_DNS_PRIMARY and VPN_OPTIMIZER_DNS_SECONDARY.
    Dns(DnsArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    let ctx = Context {
        assume_yes: cli.yes,
        default_yes: cli.default_yes,
        os_release: cli.os_release,
    };

    let result = match cli.command {
        Commands::Sysctl(args) => cmd::sysctl::run(&ctx, args),
        Commands::Dns(args) => cmd::dns::run(&ctx, args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::print_error(&format!("{e:#}"));
            ExitCode::FAILURE
        }
    }
}
