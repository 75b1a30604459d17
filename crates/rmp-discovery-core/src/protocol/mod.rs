//! Wire protocol: message model, JSON codec and the shared message handler.

pub mod codec;
pub mod handler;
pub mod message;

pub use codec::{decode, decode_datagram, encode, FrameDecoder};
pub use handler::{ProtocolHandler, Rejection, DEFAULT_GRACE_WINDOW, DISCOVERY_RETRY_INTERVAL};
pub use message::{ConnType, Message, Messages};
