//! Error types for the CLI.
//!
//! CliError wraps CoreError from the shared library and adds CLI-specific variants.

use rmp_discovery_core::error::{AdvertiseError, CoreError, GatewayError, StorageError};
use thiserror::Error;

/// Exit codes for the CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL_ERROR: i32 = 1;
    pub const NETWORK_ERROR: i32 = 2;
    pub const INVALID_ARGS: i32 = 3;
    pub const NO_GATEWAY: i32 = 4;
}

/// Main error type for the CLI
#[derive(Error, Debug)]
pub enum CliError {
    #[error("{0}")]
    Core(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("No gateway found")]
    NoGateway,
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Core(e) => match e {
                CoreError::Gateway(_) => exit_codes::NETWORK_ERROR,
                CoreError::Advertise(AdvertiseError::NoGateway { .. })
                | CoreError::Advertise(AdvertiseError::NothingRegistered) => exit_codes::NO_GATEWAY,
                CoreError::Advertise(AdvertiseError::InvalidConfig(_)) => exit_codes::INVALID_ARGS,
                CoreError::Advertise(_) => exit_codes::NETWORK_ERROR,
                CoreError::Codec(_)
                | CoreError::Storage(_)
                | CoreError::Io(_)
                | CoreError::Other(_) => exit_codes::GENERAL_ERROR,
            },
            CliError::Io(_) => exit_codes::GENERAL_ERROR,
            CliError::InvalidArgument(_) => exit_codes::INVALID_ARGS,
            CliError::NoGateway => exit_codes::NO_GATEWAY,
        }
    }
}

// Conversions from core error subtypes to CliError
impl From<StorageError> for CliError {
    fn from(e: StorageError) -> Self {
        CliError::Core(CoreError::Storage(e))
    }
}

impl From<GatewayError> for CliError {
    fn from(e: GatewayError) -> Self {
        CliError::Core(CoreError::Gateway(e))
    }
}

impl From<AdvertiseError> for CliError {
    fn from(e: AdvertiseError) -> Self {
        CliError::Core(CoreError::Advertise(e))
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
