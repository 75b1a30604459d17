//! DNS-SD advertisement of the LAN gateway, and the matching client browse.

use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tracing::{debug, info, warn};

use crate::error::GatewayError;
use crate::netif;

/// Service type under which gateways are published.
pub const SERVICE_TYPE: &str = "_rmpdiscovery._tcp.local.";

fn dnssd_err(e: impl std::fmt::Display) -> GatewayError {
    GatewayError::DnsSd(e.to_string())
}

fn hostname() -> String {
    gethostname::gethostname().to_string_lossy().to_string()
}

/// Default instance name, unique per host.
pub fn default_instance_name() -> String {
    format!("rmp-discovery-{}", hostname())
}

/// A registered DNS-SD service record. Unregistered by [`shutdown`].
///
/// [`shutdown`]: DnsSdAdvertisement::shutdown
pub struct DnsSdAdvertisement {
    daemon: ServiceDaemon,
    fullname: String,
}

impl DnsSdAdvertisement {
    /// Publish `instance` of `service_type` on every routable IPv4 address.
    pub fn register(service_type: &str, instance: &str, port: u16) -> Result<Self, GatewayError> {
        let addrs = netif::routable_ipv4_addrs()?;
        if addrs.is_empty() {
            return Err(GatewayError::DnsSd(
                "no routable IPv4 address to advertise".to_string(),
            ));
        }

        let ip_list = addrs
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let host = format!("{}.local.", hostname());
        let properties = [("version", env!("CARGO_PKG_VERSION"))];

        let service = ServiceInfo::new(
            service_type,
            instance,
            &host,
            ip_list.as_str(),
            port,
            &properties[..],
        )
        .map_err(dnssd_err)?;
        let fullname = service.get_fullname().to_string();

        let daemon = ServiceDaemon::new().map_err(dnssd_err)?;
        daemon.register(service).map_err(dnssd_err)?;

        info!(service = %fullname, addrs = %ip_list, port, "DNS-SD service registered");

        Ok(Self { daemon, fullname })
    }

    pub fn fullname(&self) -> &str {
        &self.fullname
    }

    /// Withdraw the record and stop the responder.
    pub fn shutdown(self) {
        if let Err(e) = self.daemon.unregister(&self.fullname) {
            warn!(service = %self.fullname, error = %e, "failed to unregister DNS-SD service");
        }
        if let Err(e) = self.daemon.shutdown() {
            warn!(error = %e, "failed to stop DNS-SD daemon");
        }
        info!(service = %self.fullname, "DNS-SD service unregistered");
    }
}

/// Browse for `service_type` for up to `window` and return the first
/// resolved IPv4 endpoint. Blocking; run it on a blocking thread.
pub fn browse(service_type: &str, window: Duration) -> Result<Option<SocketAddr>, GatewayError> {
    let daemon = ServiceDaemon::new().map_err(dnssd_err)?;
    let receiver = daemon.browse(service_type).map_err(dnssd_err)?;
    let deadline = Instant::now() + window;
    let mut found = None;

    while found.is_none() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match receiver.recv_timeout(remaining) {
            Ok(ServiceEvent::ServiceResolved(info)) => {
                debug!(service = %info.get_fullname(), "DNS-SD service resolved");
                found = info
                    .get_addresses()
                    .iter()
                    .find(|ip| ip.is_ipv4())
                    .map(|ip: &IpAddr| SocketAddr::new(*ip, info.get_port()));
            }
            Ok(other) => debug!(event = ?other, "DNS-SD event"),
            Err(_) => break,
        }
    }

    if let Err(e) = daemon.stop_browse(service_type) {
        debug!(error = %e, "failed to stop DNS-SD browse");
    }
    if let Err(e) = daemon.shutdown() {
        debug!(error = %e, "failed to stop DNS-SD daemon");
    }

    Ok(found)
}
