//! The discovery service: owns the registry, the allocator and every
//! background task, with a lifetime bounded by [`DiscoveryService::open`]
//! and [`DiscoveryService::stop`].

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[cfg(feature = "bluetooth")]
use crate::gateway::{BluetoothConfig, BluetoothGateway};
use crate::gateway::{dnssd, DnsSdAdvertisement, LanGateway, DEFAULT_PORT, POLL_TIMEOUT, SERVICE_TYPE};
use crate::monitor::{Monitor, DEFAULT_SCAN_INTERVAL};
use crate::protocol::{ProtocolHandler, DEFAULT_GRACE_WINDOW};
use crate::registry::{DeviceRegistry, IdAllocator, DEFAULT_FIRST_ID};
use crate::storage::StateStore;
use crate::Result;

/// Discovery service settings.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_addr: IpAddr,
    pub port: u16,
    pub enable_lan: bool,
    pub enable_dnssd: bool,
    pub dnssd_service_type: String,
    pub dnssd_instance: String,
    pub enable_bluetooth: bool,
    #[cfg(feature = "bluetooth")]
    pub bluetooth: BluetoothConfig,
    pub scan_interval: Duration,
    pub grace_window: Duration,
    pub poll_timeout: Duration,
    /// Where state is persisted; `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            enable_lan: true,
            enable_dnssd: true,
            dnssd_service_type: SERVICE_TYPE.to_string(),
            dnssd_instance: dnssd::default_instance_name(),
            enable_bluetooth: false,
            #[cfg(feature = "bluetooth")]
            bluetooth: BluetoothConfig::default(),
            scan_interval: DEFAULT_SCAN_INTERVAL,
            grace_window: DEFAULT_GRACE_WINDOW,
            poll_timeout: POLL_TIMEOUT,
            data_dir: None,
        }
    }
}

pub struct DiscoveryService {
    config: ServiceConfig,
    store: Option<StateStore>,
    registry: Arc<DeviceRegistry>,
    allocator: Arc<IdAllocator>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    dnssd: Option<DnsSdAdvertisement>,
    lan_addr: Option<SocketAddr>,
}

impl DiscoveryService {
    /// Load persisted state and build the service. Nothing runs until
    /// [`start`](Self::start).
    pub async fn open(config: ServiceConfig) -> Result<Self> {
        let store = config
            .data_dir
            .clone()
            .map(StateStore::new)
            .transpose()?;

        let (registry, cursor) = match &store {
            Some(store) => (
                DeviceRegistry::open(store.clone()).await?,
                store.load_cursor().await?,
            ),
            None => (DeviceRegistry::in_memory(), None),
        };

        let allocator = IdAllocator::new(cursor.unwrap_or(DEFAULT_FIRST_ID));
        // A crash skips the cursor save; never hand out an id already stored.
        if let Some(max) = registry.max_global_id().await {
            allocator.reserve_through(max);
        }

        info!(
            devices = registry.len().await,
            next_id = allocator.snapshot(),
            data_dir = ?config.data_dir,
            "discovery service opened"
        );

        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            config,
            store,
            registry: Arc::new(registry),
            allocator: Arc::new(allocator),
            shutdown,
            tasks: Vec::new(),
            dnssd: None,
            lan_addr: None,
        })
    }

    pub fn handler(&self) -> ProtocolHandler {
        ProtocolHandler::new(Arc::clone(&self.registry), Arc::clone(&self.allocator))
            .with_grace_window(self.config.grace_window)
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn allocator(&self) -> &Arc<IdAllocator> {
        &self.allocator
    }

    /// Address the LAN gateway is bound to, once started.
    pub fn lan_addr(&self) -> Option<SocketAddr> {
        self.lan_addr
    }

    /// Spawn the enabled gateways and the monitor.
    pub async fn start(&mut self) -> Result<()> {
        if self.config.enable_lan {
            let addr = SocketAddr::new(self.config.bind_addr, self.config.port);
            let gateway = LanGateway::bind(addr, self.handler())
                .await?
                .with_poll_timeout(self.config.poll_timeout);
            let local = gateway.local_addr()?;
            self.lan_addr = Some(local);
            self.tasks
                .push(("lan", tokio::spawn(gateway.run(self.shutdown.subscribe()))));

            if self.config.enable_dnssd {
                // Discovery still works through broadcast without DNS-SD.
                match DnsSdAdvertisement::register(
                    &self.config.dnssd_service_type,
                    &self.config.dnssd_instance,
                    local.port(),
                ) {
                    Ok(advertisement) => self.dnssd = Some(advertisement),
                    Err(e) => warn!(error = %e, "DNS-SD advertisement unavailable"),
                }
            }
        }

        if self.config.enable_bluetooth {
            self.start_bluetooth().await?;
        }

        let monitor = Monitor::new(Arc::clone(&self.registry), self.config.scan_interval);
        self.tasks
            .push(("monitor", monitor.spawn(self.shutdown.subscribe())));

        info!("discovery service started");
        Ok(())
    }

    #[cfg(feature = "bluetooth")]
    async fn start_bluetooth(&mut self) -> Result<()> {
        let gateway = BluetoothGateway::register(&self.config.bluetooth, self.handler()).await?;
        self.tasks.push((
            "bluetooth",
            tokio::spawn(gateway.run(self.shutdown.subscribe())),
        ));
        Ok(())
    }

    #[cfg(not(feature = "bluetooth"))]
    async fn start_bluetooth(&mut self) -> Result<()> {
        warn!("Bluetooth gateway requested but this build has no Bluetooth support");
        Ok(())
    }

    /// Signal shutdown, join every task, withdraw DNS-SD and persist state.
    pub async fn stop(mut self) -> Result<()> {
        self.shutdown.send_replace(true);

        for (name, task) in self.tasks.drain(..) {
            if let Err(e) = task.await {
                error!(task = name, error = %e, "task ended abnormally");
            }
        }

        if let Some(advertisement) = self.dnssd.take() {
            advertisement.shutdown();
        }

        if let Some(store) = &self.store {
            store.save_cursor(self.allocator.snapshot()).await?;
            self.registry.flush().await?;
        }

        info!(next_id = self.allocator.snapshot(), "discovery service stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{codec, decode_datagram, Messages};
    use tokio::net::UdpSocket;

    fn test_config(data_dir: Option<PathBuf>) -> ServiceConfig {
        ServiceConfig {
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            enable_dnssd: false,
            poll_timeout: Duration::from_millis(50),
            scan_interval: Duration::from_millis(50),
            data_dir,
            ..Default::default()
        }
    }

    async fn hello(gateway: SocketAddr, local_id: &str) -> i64 {
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let msg = Messages::hello(local_id, "aabbccddeeff", None, "temp", None, None);
        client
            .send_to(&codec::encode(&msg).unwrap(), gateway)
            .await
            .unwrap();
        let mut buf = [0u8; 1024];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        decode_datagram(&buf[..len]).unwrap().global_id().unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_start_serve_stop() {
        let mut service = DiscoveryService::open(test_config(None)).await.unwrap();
        service.start().await.unwrap();
        let gateway = service.lan_addr().unwrap();

        assert_eq!(hello(gateway, "sensor1").await, 100);
        assert_eq!(service.registry().len().await, 1);

        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_ids_stay_unique_across_restart() {
        let temp = tempfile::tempdir().unwrap();

        let mut first = DiscoveryService::open(test_config(Some(temp.path().to_path_buf())))
            .await
            .unwrap();
        first.start().await.unwrap();
        let a = hello(first.lan_addr().unwrap(), "a").await;
        let b = hello(first.lan_addr().unwrap(), "b").await;
        first.stop().await.unwrap();

        let mut second = DiscoveryService::open(test_config(Some(temp.path().to_path_buf())))
            .await
            .unwrap();
        second.start().await.unwrap();
        let c = hello(second.lan_addr().unwrap(), "c").await;
        assert_eq!(second.registry().len().await, 3);
        second.stop().await.unwrap();

        assert!(a < b && b < c);
    }

    #[tokio::test]
    async fn test_cursor_reconciled_after_crash() {
        let temp = tempfile::tempdir().unwrap();
        let store = StateStore::new(temp.path().to_path_buf()).unwrap();
        store.save_cursor(100).await.unwrap();

        {
            let registry = DeviceRegistry::open(store.clone()).await.unwrap();
            let allocator = Arc::new(IdAllocator::new(100));
            let handler = ProtocolHandler::new(Arc::new(registry), Arc::clone(&allocator));
            for local_id in ["a", "b", "c"] {
                handler
                    .handle(Messages::hello(local_id, "aabbccddeeff", None, "temp", None, None))
                    .await
                    .unwrap();
            }
            // Dropped without saving the cursor.
        }

        let service = DiscoveryService::open(test_config(Some(temp.path().to_path_buf())))
            .await
            .unwrap();
        assert_eq!(service.allocator().snapshot(), 103);
    }
}
