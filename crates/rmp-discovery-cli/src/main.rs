//! rmp-discovery - gateway and device-side tooling for the discovery protocol.
//!
//! `serve` runs the gateway (LAN, DNS-SD, optional Bluetooth) with the
//! heartbeat monitor; `advertise` runs the device side for an autodeploy
//! file; `devices` and `ping` inspect state and reachability.

mod cli;
mod commands;
mod error;
mod output;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use error::{exit_codes, CliError};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    let result = run(cli).await;

    match result {
        Ok(()) => std::process::exit(exit_codes::SUCCESS),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}

/// `RUST_LOG` wins; otherwise `--verbose` selects debug.
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let data_dir = cli.data_dir;
    match cli.command {
        Commands::Serve(args) => commands::run_serve(args, data_dir).await,
        Commands::Advertise(args) => commands::run_advertise(args, data_dir, cli.json).await,
        Commands::Devices(args) => commands::run_devices(args, data_dir, cli.json).await,
        Commands::Ping(args) => commands::run_ping(args, cli.json).await,
    }
}
