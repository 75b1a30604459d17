//! Advertiser state machine.
//!
//! Registers the autodeploy devices (host first) with a gateway, then keeps
//! every connected device alive. Heartbeats are checked every half of the
//! smallest device timeout; a device is refreshed once less than that half
//! remains before its own timeout would lapse.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::config::{AdvertiseConfig, AutodeployConfig, DeviceSpec};
use super::transport::{DiscoveredGateway, Transport};
use crate::error::AdvertiseError;
use crate::protocol::message::{ERROR, LOCAL_ID};
use crate::protocol::{ConnType, Message, Messages};
use crate::storage::GlobalIdStore;
use crate::types::GlobalId;

/// Connection bookkeeping for one managed device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceState {
    pub connected: bool,
    pub timeout: Duration,
    pub last_keepalive: Instant,
}

enum Connect {
    Connected(GlobalId),
    Refused(String),
    NoReply,
}

pub struct AdvertiseService {
    autodeploy: AutodeployConfig,
    config: AdvertiseConfig,
    ids: BTreeMap<String, GlobalId>,
    states: BTreeMap<String, DeviceState>,
    gateway: Option<DiscoveredGateway>,
    heartbeat_interval: Duration,
    id_store: Option<GlobalIdStore>,
}

impl AdvertiseService {
    /// Validate the autodeploy file and load previously assigned ids.
    pub async fn new(
        autodeploy: AutodeployConfig,
        config: AdvertiseConfig,
    ) -> Result<Self, AdvertiseError> {
        autodeploy.validate()?;
        let min_timeout = autodeploy
            .min_timeout()
            .ok_or_else(|| AdvertiseError::InvalidConfig("no device timeout".to_string()))?;

        let heartbeat_interval = min_timeout / 2;
        let id_store = config.ids_file.clone().map(GlobalIdStore::new);
        let ids = match &id_store {
            Some(store) => store.load().await,
            None => BTreeMap::new(),
        };

        let now = Instant::now();
        let states = autodeploy
            .all()
            .map(|spec| {
                let state = DeviceState {
                    connected: false,
                    timeout: spec.timeout().unwrap_or(min_timeout),
                    last_keepalive: now,
                };
                (spec.local_id.clone(), state)
            })
            .collect();

        info!(
            devices = autodeploy.all().count(),
            known_ids = ids.len(),
            ?heartbeat_interval,
            "advertise service set up"
        );

        Ok(Self {
            autodeploy,
            config,
            ids,
            states,
            gateway: None,
            heartbeat_interval,
            id_store,
        })
    }

    /// Stored global id of a device, if it has one.
    pub fn global_id(&self, local_id: &str) -> Option<GlobalId> {
        self.ids.get(local_id).copied().filter(|id| *id != 0)
    }

    pub fn ids(&self) -> &BTreeMap<String, GlobalId> {
        &self.ids
    }

    pub fn state(&self, local_id: &str) -> Option<&DeviceState> {
        self.states.get(local_id)
    }

    pub fn gateway(&self) -> Option<&DiscoveredGateway> {
        self.gateway.as_ref()
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    pub fn connected_count(&self) -> usize {
        self.states.values().filter(|s| s.connected).count()
    }

    pub fn all_connected(&self) -> bool {
        self.states.values().all(|s| s.connected)
    }

    /// Find a gateway, trying up to `discovery_tries` times.
    pub async fn discover(
        &mut self,
        transport: &mut Transport,
    ) -> Result<DiscoveredGateway, AdvertiseError> {
        let tries = self.config.discovery_tries.max(1);

        for attempt in 1..=tries {
            debug!(attempt, "discovering gateway");
            if let Some(found) = transport.discover().await? {
                info!(gateway = %found.address, attempt, "gateway found");
                self.gateway = Some(found.clone());
                return Ok(found);
            }
            if attempt < tries {
                tokio::time::sleep(self.config.retry_sleep).await;
            }
        }

        Err(AdvertiseError::NoGateway { tries })
    }

    /// One registration pass: host first, then every attached device.
    pub async fn advertise(&mut self, transport: &mut Transport) -> Result<(), AdvertiseError> {
        let gateway = match self.gateway.clone() {
            Some(gateway) => gateway,
            None => self.discover(transport).await?,
        };

        let host_id = match self.autodeploy.host.clone() {
            Some(host) => match self.connect(transport, &host, &gateway, None).await? {
                Some(id) => Some(id),
                None => {
                    error!(local_id = %host.local_id, "could not connect host, aborting advertising");
                    return Ok(());
                }
            },
            None => None,
        };

        for spec in self.autodeploy.devices.clone() {
            if self.states.get(&spec.local_id).is_some_and(|s| s.connected) {
                continue;
            }
            self.connect(transport, &spec, &gateway, host_id).await?;
        }

        Ok(())
    }

    /// Run registration passes until every device is connected or
    /// `advertise_tries` is exhausted. Returns the number of connected devices.
    pub async fn register_all(&mut self, transport: &mut Transport) -> Result<usize, AdvertiseError> {
        let tries = self.config.advertise_tries.max(1);

        for attempt in 1..=tries {
            debug!(attempt, "advertising");
            match self.advertise(transport).await {
                Ok(()) => {}
                Err(AdvertiseError::NoGateway { tries }) => {
                    warn!(tries, "no gateway found");
                }
                Err(e) => return Err(e),
            }
            if self.all_connected() {
                break;
            }
        }

        let connected = self.connected_count();
        info!(connected, total = self.states.len(), "registration finished");
        Ok(connected)
    }

    /// Devices whose heartbeat is due at `now`.
    pub fn due_heartbeats(&self, now: Instant) -> Vec<String> {
        self.states
            .iter()
            .filter(|(_, state)| state.connected)
            .filter(|(_, state)| {
                let max_silence = state.timeout.saturating_sub(self.heartbeat_interval);
                now.saturating_duration_since(state.last_keepalive) >= max_silence
            })
            .map(|(local_id, _)| local_id.clone())
            .collect()
    }

    /// Send every heartbeat due at `now`. Returns how many were sent.
    pub async fn send_heartbeats(
        &mut self,
        transport: &mut Transport,
        now: Instant,
    ) -> Result<usize, AdvertiseError> {
        let due = self.due_heartbeats(now);

        for local_id in &due {
            let (Some(global_id), Some(state)) = (self.global_id(local_id), self.states.get_mut(local_id))
            else {
                continue;
            };
            debug!(%local_id, global_id, "sending heartbeat");
            transport
                .send(&Messages::keep_alive(global_id, state.timeout.as_secs()))
                .await?;
            state.last_keepalive = now;
        }

        Ok(due.len())
    }

    /// Register, then heartbeat until shutdown is signalled.
    pub async fn run(
        &mut self,
        transport: &mut Transport,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), AdvertiseError> {
        if self.register_all(transport).await? == 0 {
            return Err(AdvertiseError::NothingRegistered);
        }

        while !*shutdown.borrow() {
            if let Err(e) = self.send_heartbeats(transport, Instant::now()).await {
                warn!(error = %e, "failed to send heartbeats");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.heartbeat_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Persist the assigned ids so a restart reconnects instead of
    /// registering again.
    pub async fn stop(&self) -> Result<(), AdvertiseError> {
        info!("stopping advertise service");
        if let Some(store) = &self.id_store {
            store.save(&self.ids).await?;
        }
        Ok(())
    }

    /// HELLO/CONF handshake for one device. Returns its id when connected.
    async fn connect(
        &mut self,
        transport: &mut Transport,
        spec: &DeviceSpec,
        gateway: &DiscoveredGateway,
        host: Option<GlobalId>,
    ) -> Result<Option<GlobalId>, AdvertiseError> {
        let known = self.global_id(&spec.local_id);
        if known.is_some() {
            info!(local_id = %spec.local_id, "reconnecting device");
        } else {
            info!(local_id = %spec.local_id, "connecting device");
        }

        let outcome = self.handshake(transport, spec, gateway, host, known).await?;
        let connected = match outcome {
            Connect::Connected(id) => {
                info!(local_id = %spec.local_id, global_id = id, "device connected");
                self.ids.insert(spec.local_id.clone(), id);
                Some(id)
            }
            Connect::Refused(reason) => {
                warn!(local_id = %spec.local_id, %reason, "gateway refused device");
                if known.is_some() {
                    // The stored id is no longer valid; register as new next time.
                    self.ids.remove(&spec.local_id);
                }
                None
            }
            Connect::NoReply => {
                debug!(local_id = %spec.local_id, "no valid reply, treating device as unconnected");
                None
            }
        };

        if let Some(state) = self.states.get_mut(&spec.local_id) {
            state.connected = connected.is_some();
            if connected.is_some() {
                state.last_keepalive = Instant::now();
            }
        }
        Ok(connected)
    }

    async fn handshake(
        &self,
        transport: &mut Transport,
        spec: &DeviceSpec,
        gateway: &DiscoveredGateway,
        host: Option<GlobalId>,
        known: Option<GlobalId>,
    ) -> Result<Connect, AdvertiseError> {
        let hello = Messages::hello(
            &spec.local_id,
            &gateway.hw_address,
            gateway.local_ip.as_deref(),
            &spec.device_type,
            host,
            known,
        );
        transport.send(&hello).await?;

        let Some(reply) = await_reply(transport, |msg| {
            msg.get_str(LOCAL_ID).map_or(true, |id| id == spec.local_id)
        })
        .await?
        else {
            return Ok(Connect::NoReply);
        };

        let global_id = match reply.global_id() {
            Ok(Some(id)) => id,
            _ => {
                let reason = reply.get_str(ERROR).unwrap_or("no global id in reply");
                return Ok(Connect::Refused(reason.to_string()));
            }
        };

        transport
            .send(&Messages::conf(global_id, &spec.adapter_conf))
            .await?;
        debug!(local_id = %spec.local_id, "waiting for ACK");

        let ack = await_reply(transport, |msg| msg.get(LOCAL_ID).is_none()).await?;
        match ack.map(|ack| ack.global_id()) {
            Some(Ok(Some(id))) if id == global_id => Ok(Connect::Connected(global_id)),
            _ => Ok(Connect::NoReply),
        }
    }
}

/// Wait for a gateway reply accepted by `accept`, skipping anything else.
async fn await_reply<F>(transport: &mut Transport, accept: F) -> Result<Option<Message>, AdvertiseError>
where
    F: Fn(&Message) -> bool,
{
    while let Some(msg) = transport.receive().await? {
        if *msg.conn_type() == ConnType::Ping && !Messages::is_pong(&msg) && accept(&msg) {
            return Ok(Some(msg));
        }
        debug!(message = ?msg.fields(), "skipping unrelated message");
    }
    Ok(None)
}
