//! File-backed persistence for the gateway registry and the advertiser.

pub mod ids;
pub mod state;

pub use ids::GlobalIdStore;
pub use state::StateStore;

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;

use crate::error::StorageError;

/// Get the default data directory for the discovery tools.
///
/// Uses the `directories` crate to find the appropriate platform-specific
/// data directory.
pub fn default_data_dir() -> Option<std::path::PathBuf> {
    directories::ProjectDirs::from("", "rmp", "rmp-discovery")
        .map(|dirs| dirs.data_dir().to_path_buf())
}

/// Read a JSON document, `None` if the file does not exist.
async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path).await.map_err(StorageError::Io)?;
    let value = serde_json::from_str(&content).map_err(StorageError::Serialization)?;
    Ok(Some(value))
}

/// Write a JSON document through a temporary file and rename it into place.
async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StorageError> {
    let content = serde_json::to_string_pretty(value).map_err(StorageError::Serialization)?;
    let tmp = path.with_extension("json.tmp");

    fs::write(&tmp, content).await.map_err(StorageError::Io)?;
    fs::rename(&tmp, path).await.map_err(StorageError::Io)?;

    Ok(())
}
