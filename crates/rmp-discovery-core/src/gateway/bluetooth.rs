//! Bluetooth RFCOMM gateway.
//!
//! Registers an RFCOMM server profile with BlueZ so that the service UUID
//! shows up in SDP lookups, accepts connections and serves each one on its
//! own task through [`serve_connection`].

use std::time::Duration;

use bluer::rfcomm::{Profile, ProfileHandle, Role};
use bluer::{Session, Uuid};
use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::stream::serve_connection;
use super::POLL_TIMEOUT;
use crate::error::GatewayError;
use crate::protocol::ProtocolHandler;

/// Service class UUID published by gateways and searched for by clients.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x94f39d29_7d6d_437d_973b_fba39e49d4ee);

/// Human readable service name.
pub const SERVICE_NAME: &str = "RMP Discovery";

fn bt_err(e: impl std::fmt::Display) -> GatewayError {
    GatewayError::Bluetooth(e.to_string())
}

/// Bluetooth gateway settings.
#[derive(Debug, Clone)]
pub struct BluetoothConfig {
    pub service_uuid: Uuid,
    pub service_name: String,
    /// RFCOMM channel; `None` lets BlueZ choose.
    pub channel: Option<u8>,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            service_uuid: SERVICE_UUID,
            service_name: SERVICE_NAME.to_string(),
            channel: None,
        }
    }
}

pub struct BluetoothGateway {
    _session: Session,
    profile: ProfileHandle,
    handler: ProtocolHandler,
    poll: Duration,
}

impl BluetoothGateway {
    /// Power the default adapter and publish the service record.
    pub async fn register(
        config: &BluetoothConfig,
        handler: ProtocolHandler,
    ) -> Result<Self, GatewayError> {
        let session = Session::new().await.map_err(bt_err)?;
        let adapter = session.default_adapter().await.map_err(bt_err)?;
        adapter.set_powered(true).await.map_err(bt_err)?;

        let profile = Profile {
            uuid: config.service_uuid,
            name: Some(config.service_name.clone()),
            service: Some(config.service_uuid),
            role: Some(Role::Server),
            channel: config.channel.map(u16::from),
            require_authentication: Some(false),
            require_authorization: Some(false),
            ..Default::default()
        };
        let profile = session.register_profile(profile).await.map_err(bt_err)?;

        info!(
            adapter = %adapter.name(),
            uuid = %config.service_uuid,
            name = %config.service_name,
            "Bluetooth gateway registered"
        );

        Ok(Self {
            _session: session,
            profile,
            handler,
            poll: POLL_TIMEOUT,
        })
    }

    /// Accept connections until shutdown, then wait for open connections to
    /// finish. Dropping the profile handle withdraws the service record.
    pub async fn run(mut self, shutdown: watch::Receiver<bool>) {
        let mut connections: Vec<JoinHandle<()>> = Vec::new();

        while !*shutdown.borrow() {
            connections.retain(|c| !c.is_finished());

            let request = match timeout(self.poll, self.profile.next()).await {
                Err(_) => continue,
                Ok(None) => {
                    warn!("Bluetooth profile was unregistered");
                    break;
                }
                Ok(Some(request)) => request,
            };

            let peer = request.device().to_string();
            let stream = match request.accept() {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(%peer, error = %e, "failed to accept RFCOMM connection");
                    continue;
                }
            };

            let handler = self.handler.clone();
            let shutdown = shutdown.clone();
            let poll = self.poll;
            connections.push(tokio::spawn(async move {
                if let Err(e) = serve_connection(stream, peer.clone(), handler, shutdown, poll).await {
                    warn!(%peer, error = %e, "RFCOMM connection failed");
                }
            }));
        }

        debug!(open = connections.len(), "waiting for Bluetooth connections");
        for connection in connections {
            if let Err(e) = connection.await {
                error!(error = %e, "RFCOMM connection task ended abnormally");
            }
        }
        info!("Bluetooth gateway stopped");
    }
}
