//! Gateway state on disk.
//!
//! Three documents live in the data directory: the id cursor
//! (`status.json`), the device registry (`devices.json`) and the monitoring
//! entries (`monitoring.json`).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{read_json, write_json};
use crate::error::StorageError;
use crate::types::{DeviceRecord, GlobalId, MonitoringEntry};

const STATUS_FILE: &str = "status.json";
const DEVICES_FILE: &str = "devices.json";
const MONITORING_FILE: &str = "monitoring.json";

#[derive(Debug, Serialize, Deserialize)]
struct ServiceStatus {
    next_id: GlobalId,
}

/// File-based store for gateway state.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    /// Create a new StateStore in the given directory.
    pub fn new(dir: PathBuf) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&dir).map_err(|e| {
            StorageError::DirectoryAccess(format!("{}: {}", dir.display(), e))
        })?;

        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persisted id cursor, if the gateway ran before.
    pub async fn load_cursor(&self) -> Result<Option<GlobalId>, StorageError> {
        let status: Option<ServiceStatus> = read_json(&self.dir.join(STATUS_FILE)).await?;
        Ok(status.map(|s| s.next_id))
    }

    pub async fn save_cursor(&self, next_id: GlobalId) -> Result<(), StorageError> {
        write_json(&self.dir.join(STATUS_FILE), &ServiceStatus { next_id }).await
    }

    pub async fn load_devices(&self) -> Result<Vec<DeviceRecord>, StorageError> {
        Ok(read_json(&self.dir.join(DEVICES_FILE))
            .await?
            .unwrap_or_default())
    }

    pub async fn save_devices<'a, I>(&self, devices: I) -> Result<(), StorageError>
    where
        I: IntoIterator<Item = &'a DeviceRecord>,
    {
        let devices: Vec<&DeviceRecord> = devices.into_iter().collect();
        write_json(&self.dir.join(DEVICES_FILE), &devices).await
    }

    pub async fn load_monitoring(&self) -> Result<Vec<MonitoringEntry>, StorageError> {
        Ok(read_json(&self.dir.join(MONITORING_FILE))
            .await?
            .unwrap_or_default())
    }

    pub async fn save_monitoring<'a, I>(&self, entries: I) -> Result<(), StorageError>
    where
        I: IntoIterator<Item = &'a MonitoringEntry>,
    {
        let entries: Vec<&MonitoringEntry> = entries.into_iter().collect();
        write_json(&self.dir.join(MONITORING_FILE), &entries).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::Map;

    fn create_test_store() -> (StateStore, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(temp_dir.path().to_path_buf()).unwrap();
        (store, temp_dir)
    }

    fn make_device(global_id: GlobalId) -> DeviceRecord {
        DeviceRecord {
            global_id,
            local_id: format!("dev{}", global_id),
            hw_address: "aabbccddeeff".to_string(),
            ip: None,
            device_type: "temp".to_string(),
            host: None,
            adapter_conf: Map::new(),
            monitored: false,
            last_contact: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_empty_store() {
        let (store, _temp) = create_test_store();

        assert_eq!(store.load_cursor().await.unwrap(), None);
        assert!(store.load_devices().await.unwrap().is_empty());
        assert!(store.load_monitoring().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cursor_round_trip() {
        let (store, _temp) = create_test_store();

        store.save_cursor(142).await.unwrap();
        assert_eq!(store.load_cursor().await.unwrap(), Some(142));
    }

    #[tokio::test]
    async fn test_devices_and_monitoring() {
        let (store, _temp) = create_test_store();
        let devices = [make_device(100), make_device(101)];
        let entry = MonitoringEntry {
            global_id: 101,
            timeout: 30,
            last_contact: Utc::now(),
        };

        store.save_devices(devices.iter()).await.unwrap();
        store.save_monitoring([&entry]).await.unwrap();

        assert_eq!(store.load_devices().await.unwrap(), devices.to_vec());
        assert_eq!(store.load_monitoring().await.unwrap(), vec![entry]);
        assert!(!store.dir().join("devices.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let (store, temp) = create_test_store();
        std::fs::write(temp.path().join("devices.json"), "{not json").unwrap();

        let err = store.load_devices().await.unwrap_err();
        assert!(matches!(err, StorageError::Serialization(_)));
    }
}
