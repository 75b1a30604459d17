//! Command implementations.

pub mod advertise;
pub mod devices;
pub mod ping;
pub mod serve;

pub use advertise::run_advertise;
pub use devices::run_devices;
pub use ping::run_ping;
pub use serve::run_serve;

use std::path::PathBuf;

use rmp_discovery_core::storage::default_data_dir;

use crate::error::{CliError, Result};

/// `--data-dir` if given, the platform data directory otherwise.
fn resolve_data_dir(data_dir: Option<PathBuf>) -> Result<PathBuf> {
    data_dir.or_else(default_data_dir).ok_or_else(|| {
        CliError::InvalidArgument(
            "no data directory available, pass --data-dir".to_string(),
        )
    })
}
