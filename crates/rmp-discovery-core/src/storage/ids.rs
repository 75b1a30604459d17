//! Advertiser-side map of local ids to the global ids the gateway assigned.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::warn;

use super::{read_json, write_json};
use crate::error::StorageError;
use crate::types::GlobalId;

/// Default file name inside the data directory.
pub const GLOBAL_IDS_FILE: &str = "global_ids.json";

/// JSON file holding `{local_id: global_id}`.
#[derive(Debug, Clone)]
pub struct GlobalIdStore {
    path: PathBuf,
}

impl GlobalIdStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Store at the default location inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(GLOBAL_IDS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the id map. A missing or unreadable file yields an empty map so
    /// that devices fall back to registering as new.
    pub async fn load(&self) -> BTreeMap<String, GlobalId> {
        match read_json(&self.path).await {
            Ok(Some(ids)) => ids,
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring unreadable global id file");
                BTreeMap::new()
            }
        }
    }

    pub async fn save(&self, ids: &BTreeMap<String, GlobalId>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(StorageError::Io)?;
        }
        write_json(&self.path, ids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let temp = tempfile::tempdir().unwrap();
        let store = GlobalIdStore::in_dir(temp.path());

        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp = tempfile::tempdir().unwrap();
        let store = GlobalIdStore::new(temp.path().join("nested").join("ids.json"));

        let mut ids = BTreeMap::new();
        ids.insert("host".to_string(), 100);
        ids.insert("sensor1".to_string(), 101);
        store.save(&ids).await.unwrap();

        assert_eq!(store.load().await, ids);
    }

    #[tokio::test]
    async fn test_corrupt_file_loads_empty() {
        let temp = tempfile::tempdir().unwrap();
        let store = GlobalIdStore::in_dir(temp.path());
        std::fs::write(store.path(), "[oops").unwrap();

        assert!(store.load().await.is_empty());
    }
}
