//! Advertise command - register the devices of an autodeploy file and keep
//! them alive until Ctrl+C.

use std::path::PathBuf;

use rmp_discovery_core::advertise::lan::LanTransport;
use rmp_discovery_core::advertise::{
    AdvertiseConfig, AdvertiseService, AutodeployConfig, Transport, TransportKind,
};
use rmp_discovery_core::storage::ids::GLOBAL_IDS_FILE;
use tokio::sync::watch;
use tracing::{info, warn};

use super::resolve_data_dir;
use crate::cli::AdvertiseArgs;
use crate::error::{CliError, Result};
use crate::output::get_formatter;

/// Run the advertise command
pub async fn run_advertise(
    args: AdvertiseArgs,
    data_dir: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let autodeploy = AutodeployConfig::load(&args.autodeploy).await?;
    let config = build_config(&args, data_dir)?;

    let mut transport = match (config.transport, args.gateway) {
        (TransportKind::Lan, Some(gateway)) => {
            Transport::Lan(LanTransport::new(&config)?.with_gateway(gateway))
        }
        (TransportKind::Bluetooth, Some(_)) => {
            return Err(CliError::InvalidArgument(
                "--gateway only applies to the LAN transport".to_string(),
            ));
        }
        (_, None) => Transport::open(&config).await?,
    };

    let mut service = AdvertiseService::new(autodeploy, config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutting down");
            shutdown_tx.send_replace(true);
        }
    });

    let result = service.run(&mut transport, shutdown_rx).await;

    // Keep whatever ids were assigned even when registration failed part way.
    if let Err(e) = service.stop().await {
        warn!(error = %e, "failed to persist global ids");
    }

    result?;

    let formatter = get_formatter(json);
    println!("{}", formatter.format_registrations(service.ids()));
    Ok(())
}

fn build_config(args: &AdvertiseArgs, data_dir: Option<PathBuf>) -> Result<AdvertiseConfig> {
    if args.tries == 0 {
        return Err(CliError::InvalidArgument(
            "--tries must be at least 1".to_string(),
        ));
    }

    let ids_file = match &args.ids_file {
        Some(path) => path.clone(),
        None => resolve_data_dir(data_dir)?.join(GLOBAL_IDS_FILE),
    };

    Ok(AdvertiseConfig {
        transport: args.transport.into(),
        port: args.port,
        discovery_tries: args.tries,
        advertise_tries: args.tries,
        ids_file: Some(ids_file),
        ..AdvertiseConfig::default()
    })
}
