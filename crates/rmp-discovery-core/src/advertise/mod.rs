//! Client side: find a gateway, register the managed devices and keep them
//! alive with heartbeats.

#[cfg(feature = "bluetooth")]
pub mod bluetooth;
pub mod config;
pub mod lan;
pub mod service;
pub mod transport;

pub use config::{AdvertiseConfig, AutodeployConfig, DeviceSpec, TransportKind};
pub use service::{AdvertiseService, DeviceState};
pub use transport::{DiscoveredGateway, Transport};
