//! Client transports.

#[cfg(feature = "bluetooth")]
use super::bluetooth::BluetoothTransport;
use super::config::{AdvertiseConfig, TransportKind};
use super::lan::LanTransport;
use crate::error::AdvertiseError;
use crate::protocol::Message;

/// A gateway that answered a discovery probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredGateway {
    /// Printable gateway address (IP:port or Bluetooth address).
    pub address: String,
    /// Local address used to reach it, sent as `dev_ip`.
    pub local_ip: Option<String>,
    /// Local hardware address, sent as `dev_hw_addr`.
    pub hw_address: String,
}

/// The transport an advertiser talks through.
pub enum Transport {
    Lan(LanTransport),
    #[cfg(feature = "bluetooth")]
    Bluetooth(BluetoothTransport),
}

impl Transport {
    /// Open the transport selected in `config`.
    pub async fn open(config: &AdvertiseConfig) -> Result<Self, AdvertiseError> {
        match config.transport {
            TransportKind::Lan => Ok(Transport::Lan(LanTransport::new(config)?)),
            #[cfg(feature = "bluetooth")]
            TransportKind::Bluetooth => Ok(Transport::Bluetooth(
                BluetoothTransport::new(config).await?,
            )),
            #[cfg(not(feature = "bluetooth"))]
            TransportKind::Bluetooth => Err(AdvertiseError::Bluetooth(
                "built without Bluetooth support".to_string(),
            )),
        }
    }

    /// Look for a gateway once. `Ok(None)` means nothing answered.
    pub async fn discover(&mut self) -> Result<Option<DiscoveredGateway>, AdvertiseError> {
        match self {
            Transport::Lan(t) => t.discover().await,
            #[cfg(feature = "bluetooth")]
            Transport::Bluetooth(t) => t.discover().await,
        }
    }

    pub async fn send(&mut self, msg: &Message) -> Result<(), AdvertiseError> {
        match self {
            Transport::Lan(t) => t.send(msg).await,
            #[cfg(feature = "bluetooth")]
            Transport::Bluetooth(t) => t.send(msg).await,
        }
    }

    /// Wait for the next message. `Ok(None)` on timeout.
    pub async fn receive(&mut self) -> Result<Option<Message>, AdvertiseError> {
        match self {
            Transport::Lan(t) => t.receive().await,
            #[cfg(feature = "bluetooth")]
            Transport::Bluetooth(t) => t.receive().await,
        }
    }
}
