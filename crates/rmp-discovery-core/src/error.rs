//! Error types for the discovery core.

use thiserror::Error;

/// Core error type for service-level operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Advertise error: {0}")]
    Advertise(#[from] AdvertiseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Wire format errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Message is not a JSON object")]
    NotAnObject,

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid field {field}: {message}")]
    InvalidField { field: &'static str, message: String },

    #[error("Frame exceeds {limit} bytes without completing")]
    FrameTooLarge { limit: usize },
}

/// Errors raised while handling a single protocol message.
///
/// These never leave the gateway; they are logged and the message is dropped.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Unimplemented connType |{0}|")]
    UnimplementedConnType(String),
}

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to access storage directory: {0}")]
    DirectoryAccess(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Server-side transport errors
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("DNS-SD error: {0}")]
    DnsSd(String),

    #[error("Bluetooth error: {0}")]
    Bluetooth(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Client-side (advertiser) errors
#[derive(Debug, Error)]
pub enum AdvertiseError {
    #[error("No gateway found after {tries} attempts")]
    NoGateway { tries: u32 },

    #[error("Not connected to a gateway")]
    NotConnected,

    #[error("No device could be registered")]
    NothingRegistered,

    #[error("Invalid autodeploy file: {0}")]
    InvalidConfig(String),

    #[error("Bluetooth error: {0}")]
    Bluetooth(String),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_error_from_storage_error() {
        let err = CoreError::from(StorageError::NotFound("devices.json".to_string()));
        assert!(format!("{}", err).contains("Not found: devices.json"));
    }

    #[test]
    fn test_handler_error_is_transparent_for_codec() {
        let err = HandlerError::from(CodecError::MissingField("local_id"));
        assert_eq!(format!("{}", err), "Missing field: local_id");
    }

    #[test]
    fn test_unimplemented_conn_type_display() {
        let err = HandlerError::UnimplementedConnType("bogus".to_string());
        assert_eq!(format!("{}", err), "Unimplemented connType |bogus|");
    }
}
