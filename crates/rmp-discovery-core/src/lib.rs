//! Discovery and registration protocol for headless IoT devices.
//!
//! Devices find a gateway on the local network (UDP broadcast / DNS-SD or
//! Bluetooth RFCOMM), register under a durable global identifier, push their
//! adapter configuration and keep themselves alive with heartbeats. Devices
//! that fall silent for longer than their declared timeout are evicted.

pub mod advertise;
pub mod error;
pub mod gateway;
pub mod monitor;
pub mod netif;
pub mod protocol;
pub mod registry;
pub mod service;
pub mod storage;
pub mod types;

pub use error::{CoreError, Result};
pub use service::{DiscoveryService, ServiceConfig};
pub use types::{DeviceRecord, GlobalId, MonitoringEntry};
