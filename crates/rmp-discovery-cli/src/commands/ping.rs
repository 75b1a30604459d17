//! Ping command - check that a gateway answers discovery probes.

use std::time::Duration;

use rmp_discovery_core::advertise::lan::LanTransport;
use rmp_discovery_core::advertise::AdvertiseConfig;

use crate::cli::PingArgs;
use crate::error::{CliError, Result};
use crate::output::get_formatter;

/// Run the ping command
pub async fn run_ping(args: PingArgs, json: bool) -> Result<()> {
    let config = AdvertiseConfig {
        port: args.port,
        dnssd_window: Duration::from_secs(args.dnssd_window),
        receive_timeout: Duration::from_millis(args.timeout),
        ..AdvertiseConfig::default()
    };

    let mut transport = LanTransport::new(&config)?;
    if let Some(gateway) = args.gateway {
        transport = transport.with_gateway(gateway);
    }

    let gateway = transport.discover().await?.ok_or(CliError::NoGateway)?;

    let formatter = get_formatter(json);
    println!("{}", formatter.format_gateway(&gateway));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    use rmp_discovery_core::{DiscoveryService, ServiceConfig};

    #[tokio::test]
    async fn test_ping_pinned_gateway() {
        let config = ServiceConfig {
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            enable_dnssd: false,
            data_dir: None,
            ..ServiceConfig::default()
        };
        let mut service = DiscoveryService::open(config).await.unwrap();
        service.start().await.unwrap();
        let addr = service.lan_addr().unwrap();

        let args = PingArgs {
            port: addr.port(),
            gateway: Some(addr),
            dnssd_window: 1,
            timeout: 1000,
        };
        run_ping(args, true).await.unwrap();

        service.stop().await.unwrap();
    }
}
