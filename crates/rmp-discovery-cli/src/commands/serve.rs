//! Serve command - run the discovery gateway.

use std::path::PathBuf;
use std::time::Duration;

use rmp_discovery_core::{DiscoveryService, ServiceConfig};
use tracing::info;

use super::resolve_data_dir;
use crate::cli::ServeArgs;
use crate::error::{CliError, Result};

/// Run the serve command
pub async fn run_serve(args: ServeArgs, data_dir: Option<PathBuf>) -> Result<()> {
    let config = build_config(&args, data_dir)?;
    let mut service = DiscoveryService::open(config).await?;
    service.start().await?;

    if let Some(addr) = service.lan_addr() {
        info!(%addr, "gateway listening");
    }
    info!("press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    service.stop().await?;
    Ok(())
}

fn build_config(args: &ServeArgs, data_dir: Option<PathBuf>) -> Result<ServiceConfig> {
    if args.scan_interval == 0 {
        return Err(CliError::InvalidArgument(
            "--scan-interval must be at least 1 second".to_string(),
        ));
    }

    let data_dir = if args.in_memory {
        None
    } else {
        Some(resolve_data_dir(data_dir)?)
    };

    let mut config = ServiceConfig {
        bind_addr: args.bind,
        port: args.port,
        enable_lan: !args.no_lan,
        enable_dnssd: !args.no_dnssd,
        enable_bluetooth: args.bluetooth,
        scan_interval: Duration::from_secs(args.scan_interval),
        grace_window: Duration::from_secs(args.grace_window),
        data_dir,
        ..ServiceConfig::default()
    };
    if let Some(instance) = &args.instance {
        config.dnssd_instance = instance.clone();
    }

    Ok(config)
}
