//! Server-side transports.
//!
//! Every gateway decodes incoming bytes into messages, hands them to the
//! shared [`ProtocolHandler`](crate::protocol::ProtocolHandler) and writes the
//! reply back on the same transport.

#[cfg(feature = "bluetooth")]
pub mod bluetooth;
pub mod dnssd;
pub mod lan;
pub mod stream;

#[cfg(feature = "bluetooth")]
pub use bluetooth::{BluetoothConfig, BluetoothGateway};
pub use dnssd::{DnsSdAdvertisement, SERVICE_TYPE};
pub use lan::{create_gateway_socket, LanGateway, DEFAULT_PORT};
pub use stream::serve_connection;

use std::time::Duration;

/// Poll interval for receive/accept loops; shutdown is checked between polls.
pub const POLL_TIMEOUT: Duration = Duration::from_millis(500);
