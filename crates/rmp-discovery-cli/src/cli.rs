//! CLI argument definitions using clap.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use rmp_discovery_core::advertise::TransportKind;
use rmp_discovery_core::gateway::DEFAULT_PORT;

/// Device discovery and registration gateway
#[derive(Parser, Debug)]
#[command(name = "rmp-discovery")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Verbose output (debug logging unless RUST_LOG is set)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory for persisted state
    #[arg(long, global = true, env = "RMP_DISCOVERY_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the discovery gateway until Ctrl+C
    Serve(ServeArgs),

    /// Register the devices of an autodeploy file and keep them alive
    Advertise(AdvertiseArgs),

    /// List registered devices
    Devices(DevicesArgs),

    /// Look for a gateway on the local network
    Ping(PingArgs),
}

// ==================== Serve ====================

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// UDP port of the LAN gateway
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Address to bind the LAN gateway to
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// Disable the LAN gateway
    #[arg(long)]
    pub no_lan: bool,

    /// Do not publish a DNS-SD record
    #[arg(long)]
    pub no_dnssd: bool,

    /// DNS-SD instance name (defaults to one derived from the hostname)
    #[arg(long)]
    pub instance: Option<String>,

    /// Enable the Bluetooth RFCOMM gateway
    #[arg(long)]
    pub bluetooth: bool,

    /// Seconds between monitor scans
    #[arg(long, default_value = "5")]
    pub scan_interval: u64,

    /// Seconds within which a repeated HELLO counts as a retransmission
    #[arg(long, default_value = "10")]
    pub grace_window: u64,

    /// Keep all state in memory
    #[arg(long)]
    pub in_memory: bool,
}

// ==================== Advertise ====================

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum TransportArg {
    Lan,
    Bluetooth,
}

impl From<TransportArg> for TransportKind {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Lan => TransportKind::Lan,
            TransportArg::Bluetooth => TransportKind::Bluetooth,
        }
    }
}

#[derive(Args, Debug)]
pub struct AdvertiseArgs {
    /// Autodeploy file describing the devices to register
    pub autodeploy: PathBuf,

    /// Transport used to reach the gateway
    #[arg(long, value_enum, default_value = "lan")]
    pub transport: TransportArg,

    /// Gateway UDP port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Skip discovery and talk to this gateway directly
    #[arg(long)]
    pub gateway: Option<SocketAddr>,

    /// Registration attempts before giving up
    #[arg(long, default_value = "5")]
    pub tries: u32,

    /// File holding the assigned global ids (defaults to the data directory)
    #[arg(long)]
    pub ids_file: Option<PathBuf>,
}

// ==================== Devices ====================

#[derive(Args, Debug)]
pub struct DevicesArgs {
    /// Only show devices with an active heartbeat timeout
    #[arg(long)]
    pub monitored: bool,
}

// ==================== Ping ====================

#[derive(Args, Debug)]
pub struct PingArgs {
    /// Gateway UDP port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Probe this address instead of discovering
    #[arg(long)]
    pub gateway: Option<SocketAddr>,

    /// Seconds to browse DNS-SD before broadcasting
    #[arg(long, default_value = "5")]
    pub dnssd_window: u64,

    /// Reply timeout in milliseconds
    #[arg(long, default_value = "2000")]
    pub timeout: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_serve_defaults() {
        let cli = Cli::try_parse_from(["rmp-discovery", "serve"]).unwrap();
        let Commands::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.port, 20123);
        assert_eq!(args.scan_interval, 5);
        assert_eq!(args.grace_window, 10);
        assert!(!args.bluetooth);
    }

    #[test]
    fn test_advertise_requires_file() {
        assert!(Cli::try_parse_from(["rmp-discovery", "advertise"]).is_err());

        let cli = Cli::try_parse_from([
            "rmp-discovery",
            "--json",
            "advertise",
            "deploy.json",
            "--gateway",
            "10.0.0.1:20123",
        ])
        .unwrap();
        assert!(cli.json);
        let Commands::Advertise(args) = cli.command else {
            panic!("expected advertise");
        };
        assert_eq!(args.autodeploy, PathBuf::from("deploy.json"));
        assert_eq!(args.gateway, Some("10.0.0.1:20123".parse().unwrap()));
    }
}
