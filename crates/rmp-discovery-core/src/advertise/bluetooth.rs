//! RFCOMM client transport.
//!
//! Gateways are found among known devices advertising the service UUID; the
//! first one that answers a probe keeps the connection.

use std::time::Duration;

use bluer::rfcomm::{Profile, ProfileHandle, Role, Stream};
use bluer::{Adapter, Device, Session, Uuid};
use futures_util::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use super::config::AdvertiseConfig;
use super::transport::DiscoveredGateway;
use crate::error::AdvertiseError;
use crate::gateway::bluetooth::SERVICE_UUID;
use crate::gateway::stream::READ_CHUNK;
use crate::protocol::{codec, FrameDecoder, Message, Messages};
use crate::types::normalize_hw_address;

/// Time allowed for an RFCOMM profile connection to come up.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

fn bt_err(e: impl std::fmt::Display) -> AdvertiseError {
    AdvertiseError::Bluetooth(e.to_string())
}

pub struct BluetoothTransport {
    _session: Session,
    adapter: Adapter,
    profile: ProfileHandle,
    service_uuid: Uuid,
    stream: Option<Stream>,
    decoder: FrameDecoder,
    receive_timeout: Duration,
}

impl BluetoothTransport {
    pub async fn new(config: &AdvertiseConfig) -> Result<Self, AdvertiseError> {
        let session = Session::new().await.map_err(bt_err)?;
        let adapter = session.default_adapter().await.map_err(bt_err)?;
        adapter.set_powered(true).await.map_err(bt_err)?;

        let profile = session
            .register_profile(Profile {
                uuid: SERVICE_UUID,
                role: Some(Role::Client),
                require_authentication: Some(false),
                require_authorization: Some(false),
                ..Default::default()
            })
            .await
            .map_err(bt_err)?;

        Ok(Self {
            _session: session,
            adapter,
            profile,
            service_uuid: SERVICE_UUID,
            stream: None,
            decoder: FrameDecoder::new(),
            receive_timeout: config.receive_timeout,
        })
    }

    pub async fn discover(&mut self) -> Result<Option<DiscoveredGateway>, AdvertiseError> {
        self.stream = None;
        self.decoder = FrameDecoder::new();

        let local = normalize_hw_address(&self.adapter.address().await.map_err(bt_err)?.to_string());

        for address in self.adapter.device_addresses().await.map_err(bt_err)? {
            let device = self.adapter.device(address).map_err(bt_err)?;
            let offers_service = device
                .uuids()
                .await
                .map_err(bt_err)?
                .is_some_and(|uuids| uuids.contains(&self.service_uuid));
            if !offers_service {
                continue;
            }

            debug!(%address, "trying Bluetooth gateway");
            match self.connect(&device).await {
                Ok(stream) => self.stream = Some(stream),
                Err(e) => {
                    debug!(%address, error = %e, "RFCOMM connection failed");
                    continue;
                }
            }

            self.send(&Messages::probe()).await?;
            if let Some(reply) = self.receive().await? {
                if Messages::is_pong(&reply) {
                    info!(gateway = %address, "gateway answered");
                    return Ok(Some(DiscoveredGateway {
                        address: address.to_string(),
                        local_ip: None,
                        hw_address: local,
                    }));
                }
            }
            self.stream = None;
        }

        Ok(None)
    }

    async fn connect(&mut self, device: &Device) -> Result<Stream, AdvertiseError> {
        let uuid = self.service_uuid;
        let profile = &mut self.profile;

        let attempt = async {
            tokio::select! {
                res = async {
                    // Already-connected devices report an error here; the profile connect decides.
                    if let Err(e) = device.connect().await {
                        debug!(error = %e, "device connect failed");
                    }
                    device.connect_profile(&uuid).await
                } => {
                    res.map_err(bt_err)?;
                    let request = profile.next().await.ok_or_else(|| bt_err("profile closed"))?;
                    request.accept().map_err(bt_err)
                }
                request = profile.next() => {
                    let request = request.ok_or_else(|| bt_err("profile closed"))?;
                    request.accept().map_err(bt_err)
                }
            }
        };

        timeout(CONNECT_TIMEOUT, attempt)
            .await
            .map_err(|_| bt_err("connection timed out"))?
    }

    pub async fn send(&mut self, msg: &Message) -> Result<(), AdvertiseError> {
        let stream = self.stream.as_mut().ok_or(AdvertiseError::NotConnected)?;
        let bytes = codec::encode(msg)?;
        stream.write_all(&bytes).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Next complete message from the connection, reframed from the byte
    /// stream. `Ok(None)` on timeout or when the gateway closes.
    pub async fn receive(&mut self) -> Result<Option<Message>, AdvertiseError> {
        let deadline = Instant::now() + self.receive_timeout;
        let mut buf = vec![0u8; READ_CHUNK];

        loop {
            while let Some(frame) = self.decoder.next_frame() {
                match frame {
                    Ok(msg) => return Ok(Some(msg)),
                    Err(e) => warn!(error = %e, "skipping malformed input from gateway"),
                }
            }

            let stream = self.stream.as_mut().ok_or(AdvertiseError::NotConnected)?;
            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, stream.read(&mut buf)).await {
                Err(_) => return Ok(None),
                Ok(Ok(0)) => {
                    info!("gateway closed the connection");
                    self.stream = None;
                    return Ok(None);
                }
                Ok(Ok(len)) => self.decoder.extend(&buf[..len]),
                Ok(Err(e)) => {
                    self.stream = None;
                    return Err(e.into());
                }
            }
        }
    }
}
