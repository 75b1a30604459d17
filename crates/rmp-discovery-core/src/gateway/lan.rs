//! UDP gateway. One datagram carries exactly one message.
//!
//! The socket owns the port exclusively: a second gateway on the same port
//! would split one device's traffic between two registries.

use std::net::SocketAddr;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::POLL_TIMEOUT;
use crate::error::GatewayError;
use crate::protocol::{codec, ProtocolHandler};

/// Default gateway port.
pub const DEFAULT_PORT: u16 = 20123;

/// Receive buffer; datagrams are well under 1 KiB in practice.
const MAX_DATAGRAM: usize = 2048;

/// Create the gateway's UDP socket. Binding a port already in use fails.
pub fn create_gateway_socket(addr: SocketAddr) -> Result<std::net::UdpSocket, std::io::Error> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;

    socket.bind(&addr.into())?;

    socket.set_nonblocking(true)?;

    Ok(socket.into())
}

/// UDP gateway bound to one socket.
pub struct LanGateway {
    socket: UdpSocket,
    handler: ProtocolHandler,
    poll: Duration,
}

impl LanGateway {
    /// Bind the gateway socket. Port 0 picks an ephemeral port.
    pub async fn bind(addr: SocketAddr, handler: ProtocolHandler) -> Result<Self, GatewayError> {
        let bind_err = |source| GatewayError::Bind {
            addr: addr.to_string(),
            source,
        };
        let std_socket = create_gateway_socket(addr).map_err(bind_err)?;
        let socket = UdpSocket::from_std(std_socket).map_err(bind_err)?;

        info!(addr = %socket.local_addr()?, "LAN gateway listening");

        Ok(Self {
            socket,
            handler,
            poll: POLL_TIMEOUT,
        })
    }

    pub fn with_poll_timeout(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Serve datagrams until shutdown is signalled. The socket closes on return.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let mut buf = vec![0u8; MAX_DATAGRAM];

        while !*shutdown.borrow() {
            match timeout(self.poll, self.socket.recv_from(&mut buf)).await {
                Ok(Ok((len, peer))) => self.serve_datagram(&buf[..len], peer).await,
                Ok(Err(ref e)) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                    // ICMP port unreachable from an earlier reply; harmless.
                    debug!(error = %e, "UDP receive reset");
                }
                Ok(Err(e)) => {
                    error!(error = %e, "UDP receive error");
                }
                Err(_) => {
                    // Timeout - check shutdown
                }
            }
        }

        info!("LAN gateway stopped");
    }

    async fn serve_datagram(&self, data: &[u8], peer: SocketAddr) {
        let msg = match codec::decode_datagram(data) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(%peer, error = %e, "dropping malformed datagram");
                return;
            }
        };

        let Some(reply) = self.handler.handle(msg).await else {
            return;
        };

        match codec::encode(&reply) {
            Ok(bytes) => {
                if let Err(e) = self.socket.send_to(&bytes, peer).await {
                    warn!(%peer, error = %e, "failed to send reply");
                }
            }
            Err(e) => error!(error = %e, "failed to encode reply"),
        }
    }
}
