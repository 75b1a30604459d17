//! UDP client transport with DNS-SD discovery and broadcast fallback.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use super::config::AdvertiseConfig;
use super::transport::DiscoveredGateway;
use crate::error::AdvertiseError;
use crate::gateway::dnssd;
use crate::netif;
use crate::protocol::{codec, Message, Messages};

const MAX_DATAGRAM: usize = 2048;

/// Create an unbound-port UDP socket allowed to broadcast.
fn create_broadcast_socket() -> std::io::Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_broadcast(true)?;
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
    socket.bind(&addr.into())?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

pub struct LanTransport {
    socket: UdpSocket,
    pinned: Option<SocketAddr>,
    gateway: Option<SocketAddr>,
    port: u16,
    service_type: String,
    dnssd_window: Duration,
    receive_timeout: Duration,
}

impl LanTransport {
    pub fn new(config: &AdvertiseConfig) -> Result<Self, AdvertiseError> {
        let socket = UdpSocket::from_std(create_broadcast_socket()?)?;
        Ok(Self {
            socket,
            pinned: None,
            gateway: None,
            port: config.port,
            service_type: config.service_type.clone(),
            dnssd_window: config.dnssd_window,
            receive_timeout: config.receive_timeout,
        })
    }

    /// Skip DNS-SD and broadcast; probe only `gateway`.
    pub fn with_gateway(mut self, gateway: SocketAddr) -> Self {
        self.pinned = Some(gateway);
        self
    }

    /// Gateway found by the last successful discovery.
    pub fn gateway(&self) -> Option<SocketAddr> {
        self.gateway
    }

    pub async fn discover(&mut self) -> Result<Option<DiscoveredGateway>, AdvertiseError> {
        if let Some(pinned) = self.pinned {
            return self.confirm(pinned).await;
        }

        if let Some(candidate) = self.browse().await {
            if let Some(found) = self.confirm(candidate).await? {
                return Ok(Some(found));
            }
        }

        info!("no gateway via DNS-SD, falling back to broadcast");
        for iface in netif::ipv4_interfaces()? {
            let target = iface.broadcast.unwrap_or(Ipv4Addr::LOCALHOST);
            let target = SocketAddr::new(IpAddr::V4(target), self.port);
            debug!(interface = %iface.name, %target, "broadcasting discovery probe");

            if let Some(gateway) = self.probe(target).await? {
                self.gateway = Some(gateway);
                let hw_address = netif::hardware_address(&iface.name)
                    .or_else(netif::any_hardware_address)
                    .unwrap_or_default();
                return Ok(Some(DiscoveredGateway {
                    address: gateway.to_string(),
                    local_ip: Some(iface.ip.to_string()),
                    hw_address,
                }));
            }
        }

        Ok(None)
    }

    async fn browse(&self) -> Option<SocketAddr> {
        let service_type = self.service_type.clone();
        let window = self.dnssd_window;
        let result = tokio::task::spawn_blocking(move || dnssd::browse(&service_type, window)).await;

        match result {
            Ok(Ok(found)) => found,
            Ok(Err(e)) => {
                warn!(error = %e, "DNS-SD browse failed");
                None
            }
            Err(e) => {
                warn!(error = %e, "DNS-SD browse task failed");
                None
            }
        }
    }

    /// Probe a known candidate and resolve the local interface facing it.
    async fn confirm(&mut self, candidate: SocketAddr) -> Result<Option<DiscoveredGateway>, AdvertiseError> {
        let Some(gateway) = self.probe(candidate).await? else {
            return Ok(None);
        };
        self.gateway = Some(gateway);

        let local_ip = netif::route_source_ip(gateway).ok();
        let hw_address = match local_ip {
            Some(ip) => netif::interface_for_ip(ip)?
                .and_then(|iface| netif::hardware_address(&iface.name)),
            None => None,
        }
        .or_else(netif::any_hardware_address)
        .unwrap_or_default();

        Ok(Some(DiscoveredGateway {
            address: gateway.to_string(),
            local_ip: local_ip.map(|ip| ip.to_string()),
            hw_address,
        }))
    }

    /// Send a probe to `target` and wait for a PONG. Returns the responder.
    async fn probe(&self, target: SocketAddr) -> Result<Option<SocketAddr>, AdvertiseError> {
        let probe = codec::encode(&Messages::probe())?;
        if let Err(e) = self.socket.send_to(&probe, target).await {
            debug!(%target, error = %e, "probe not sent");
            return Ok(None);
        }

        let deadline = Instant::now() + self.receive_timeout;
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, self.socket.recv_from(&mut buf)).await {
                Err(_) => return Ok(None),
                Ok(Err(e)) => {
                    debug!(error = %e, "receive error while probing");
                    return Ok(None);
                }
                Ok(Ok((len, from))) => match codec::decode_datagram(&buf[..len]) {
                    Ok(reply) if Messages::is_pong(&reply) => {
                        info!(gateway = %from, "gateway answered");
                        return Ok(Some(from));
                    }
                    _ => debug!(%from, "ignoring non-pong reply"),
                },
            }
        }
    }

    pub async fn send(&mut self, msg: &Message) -> Result<(), AdvertiseError> {
        let gateway = self.gateway.ok_or(AdvertiseError::NotConnected)?;
        let bytes = codec::encode(msg)?;
        self.socket.send_to(&bytes, gateway).await?;
        Ok(())
    }

    pub async fn receive(&mut self) -> Result<Option<Message>, AdvertiseError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        match timeout(self.receive_timeout, self.socket.recv_from(&mut buf)).await {
            Err(_) => Ok(None),
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok((len, from))) => match codec::decode_datagram(&buf[..len]) {
                Ok(msg) => Ok(Some(msg)),
                Err(e) => {
                    warn!(%from, error = %e, "dropping malformed reply");
                    Ok(None)
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::LanGateway;
    use crate::protocol::ProtocolHandler;
    use crate::registry::{DeviceRegistry, IdAllocator};
    use std::sync::Arc;
    use tokio::sync::watch;

    fn client_config() -> AdvertiseConfig {
        AdvertiseConfig {
            receive_timeout: Duration::from_millis(500),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_discover_known_gateway() {
        let handler = ProtocolHandler::new(
            Arc::new(DeviceRegistry::in_memory()),
            Arc::new(IdAllocator::default()),
        );
        let gateway = LanGateway::bind("127.0.0.1:0".parse().unwrap(), handler)
            .await
            .unwrap()
            .with_poll_timeout(Duration::from_millis(50));
        let addr = gateway.local_addr().unwrap();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(gateway.run(rx));

        let mut transport = LanTransport::new(&client_config()).unwrap().with_gateway(addr);
        let found = transport.discover().await.unwrap().unwrap();

        assert_eq!(found.address, addr.to_string());
        assert_eq!(found.local_ip.as_deref(), Some("127.0.0.1"));

        tx.send_replace(true);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_silent_gateway_is_not_found() {
        // Bound but never answers.
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut transport = LanTransport::new(&client_config())
            .unwrap()
            .with_gateway(silent.local_addr().unwrap());

        assert!(transport.discover().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_send_requires_gateway() {
        let mut transport = LanTransport::new(&client_config()).unwrap();
        let err = transport.send(&Messages::probe()).await.unwrap_err();
        assert!(matches!(err, AdvertiseError::NotConnected));
    }
}
