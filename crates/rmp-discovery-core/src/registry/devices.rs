//! Device registry.
//!
//! Holds device records and monitoring entries behind one lock so that
//! find-or-insert and batch eviction are atomic with respect to concurrent
//! gateway connections. When backed by a [`StateStore`], structural changes
//! are written through; heartbeats only touch memory until [`flush`].
//!
//! [`flush`]: DeviceRegistry::flush

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::StorageError;
use crate::storage::StateStore;
use crate::types::{DeviceRecord, GlobalId, MonitoringEntry};

/// Outcome of [`DeviceRegistry::find_or_insert_with`].
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Existing(DeviceRecord),
    Inserted(DeviceRecord),
}

#[derive(Debug, Default)]
struct RegistryState {
    devices: BTreeMap<GlobalId, DeviceRecord>,
    monitoring: BTreeMap<GlobalId, MonitoringEntry>,
}

impl RegistryState {
    fn find_by_local_key(&self, local_id: &str, hw_address: &str) -> Option<&DeviceRecord> {
        self.devices
            .values()
            .find(|d| d.local_id == local_id && d.hw_address == hw_address)
    }
}

/// Shared store of registered devices.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    state: RwLock<RegistryState>,
    store: Option<StateStore>,
}

impl DeviceRegistry {
    /// Registry without a backing store.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Registry backed by `store`, preloaded with its persisted state.
    pub async fn open(store: StateStore) -> Result<Self, StorageError> {
        let mut state = RegistryState::default();

        for device in store.load_devices().await? {
            state.devices.insert(device.global_id, device);
        }
        for entry in store.load_monitoring().await? {
            if state.devices.contains_key(&entry.global_id) {
                state.monitoring.insert(entry.global_id, entry);
            }
        }
        for device in state.devices.values_mut() {
            device.monitored = state.monitoring.contains_key(&device.global_id);
        }

        debug!(
            devices = state.devices.len(),
            monitored = state.monitoring.len(),
            "loaded registry"
        );

        Ok(Self {
            state: RwLock::new(state),
            store: Some(store),
        })
    }

    pub async fn find_by_local_key(&self, local_id: &str, hw_address: &str) -> Option<DeviceRecord> {
        self.state
            .read()
            .await
            .find_by_local_key(local_id, hw_address)
            .cloned()
    }

    pub async fn find_by_id(&self, global_id: GlobalId) -> Option<DeviceRecord> {
        self.state.read().await.devices.get(&global_id).cloned()
    }

    /// Return the record for `(local_id, hw_address)`, or insert the one built
    /// by `make` if there is none. Both steps run under the same lock.
    pub async fn find_or_insert_with<F>(
        &self,
        local_id: &str,
        hw_address: &str,
        make: F,
    ) -> Result<Lookup, StorageError>
    where
        F: FnOnce() -> DeviceRecord,
    {
        let mut state = self.state.write().await;

        if let Some(existing) = state.find_by_local_key(local_id, hw_address) {
            return Ok(Lookup::Existing(existing.clone()));
        }

        let record = make();
        state.devices.insert(record.global_id, record.clone());
        self.persist_devices(&state).await?;

        Ok(Lookup::Inserted(record))
    }

    /// Insert or replace a record.
    pub async fn upsert(&self, mut record: DeviceRecord) -> Result<(), StorageError> {
        let mut state = self.state.write().await;
        record.monitored = state.monitoring.contains_key(&record.global_id);
        state.devices.insert(record.global_id, record);
        self.persist_devices(&state).await
    }

    /// Refresh `last_contact` of a device. Returns false if it is unknown.
    pub async fn touch(&self, global_id: GlobalId, now: DateTime<Utc>) -> bool {
        match self.state.write().await.devices.get_mut(&global_id) {
            Some(device) => {
                device.last_contact = now;
                true
            }
            None => false,
        }
    }

    /// Heartbeat: refresh both the device and its monitoring entry.
    pub async fn heartbeat(&self, global_id: GlobalId, now: DateTime<Utc>) -> bool {
        let mut state = self.state.write().await;
        let Some(device) = state.devices.get_mut(&global_id) else {
            return false;
        };
        device.last_contact = now;
        if let Some(entry) = state.monitoring.get_mut(&global_id) {
            entry.last_contact = now;
        }
        true
    }

    /// Merge `conf` into the device's adapter configuration and refresh
    /// `last_contact`. Returns false if the device is unknown.
    pub async fn merge_adapter_conf(
        &self,
        global_id: GlobalId,
        conf: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let mut state = self.state.write().await;
        let Some(device) = state.devices.get_mut(&global_id) else {
            return Ok(false);
        };

        device.adapter_conf.extend(conf);
        device.last_contact = now;
        self.persist_devices(&state).await?;

        Ok(true)
    }

    /// Create or refresh the monitoring entry of a known device.
    pub async fn watch(
        &self,
        global_id: GlobalId,
        timeout: u64,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let mut state = self.state.write().await;
        let Some(device) = state.devices.get_mut(&global_id) else {
            return Ok(false);
        };

        let newly_monitored = !device.monitored;
        device.monitored = true;
        state.monitoring.insert(
            global_id,
            MonitoringEntry {
                global_id,
                timeout,
                last_contact: now,
            },
        );

        if newly_monitored {
            self.persist_devices(&state).await?;
        }
        self.persist_monitoring(&state).await?;

        Ok(true)
    }

    /// Remove devices and their monitoring entries in one batch.
    ///
    /// Returns the ids that were actually present.
    pub async fn delete(&self, ids: &[GlobalId]) -> Result<Vec<GlobalId>, StorageError> {
        let mut state = self.state.write().await;
        let removed: Vec<GlobalId> = ids
            .iter()
            .copied()
            .filter(|id| {
                let device = state.devices.remove(id).is_some();
                let entry = state.monitoring.remove(id).is_some();
                device || entry
            })
            .collect();

        if !removed.is_empty() {
            self.persist_all(&state).await?;
        }

        Ok(removed)
    }

    /// Evict every monitored device whose entry fails `keep`.
    ///
    /// The scan and the deletion happen under a single write lock so that a
    /// heartbeat cannot slip in between.
    pub async fn retain_monitored<F>(&self, mut keep: F) -> Result<Vec<GlobalId>, StorageError>
    where
        F: FnMut(&MonitoringEntry) -> bool,
    {
        let mut state = self.state.write().await;
        let evicted: Vec<GlobalId> = state
            .monitoring
            .values()
            .filter(|entry| !keep(entry))
            .map(|entry| entry.global_id)
            .collect();

        if evicted.is_empty() {
            return Ok(evicted);
        }

        for id in &evicted {
            state.monitoring.remove(id);
            state.devices.remove(id);
        }
        self.persist_all(&state).await?;

        Ok(evicted)
    }

    /// Snapshot of all device records ordered by id.
    pub async fn devices(&self) -> Vec<DeviceRecord> {
        self.state.read().await.devices.values().cloned().collect()
    }

    /// Snapshot of all monitoring entries ordered by id.
    pub async fn monitoring_entries(&self) -> Vec<MonitoringEntry> {
        self.state.read().await.monitoring.values().cloned().collect()
    }

    pub async fn monitoring_entry(&self, global_id: GlobalId) -> Option<MonitoringEntry> {
        self.state.read().await.monitoring.get(&global_id).cloned()
    }

    pub async fn max_global_id(&self) -> Option<GlobalId> {
        self.state.read().await.devices.keys().next_back().copied()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.devices.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.devices.is_empty()
    }

    /// Write the full state, including heartbeat timestamps, to the store.
    pub async fn flush(&self) -> Result<(), StorageError> {
        let state = self.state.read().await;
        self.persist_all(&state).await
    }

    async fn persist_devices(&self, state: &RegistryState) -> Result<(), StorageError> {
        match &self.store {
            Some(store) => store.save_devices(state.devices.values()).await,
            None => Ok(()),
        }
    }

    async fn persist_monitoring(&self, state: &RegistryState) -> Result<(), StorageError> {
        match &self.store {
            Some(store) => store.save_monitoring(state.monitoring.values()).await,
            None => Ok(()),
        }
    }

    async fn persist_all(&self, state: &RegistryState) -> Result<(), StorageError> {
        self.persist_devices(state).await?;
        self.persist_monitoring(state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn make_device(global_id: GlobalId, local_id: &str) -> DeviceRecord {
        DeviceRecord {
            global_id,
            local_id: local_id.to_string(),
            hw_address: "aabbccddeeff".to_string(),
            ip: Some("10.0.0.5".to_string()),
            device_type: "temp".to_string(),
            host: None,
            adapter_conf: Map::new(),
            monitored: false,
            last_contact: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_find_by_local_key_and_id() {
        let registry = DeviceRegistry::in_memory();
        registry.upsert(make_device(100, "sensor1")).await.unwrap();

        assert!(registry.find_by_id(100).await.is_some());
        assert!(registry.find_by_id(101).await.is_none());
        assert_eq!(
            registry
                .find_by_local_key("sensor1", "aabbccddeeff")
                .await
                .map(|d| d.global_id),
            Some(100)
        );
        assert!(registry
            .find_by_local_key("sensor1", "001122334455")
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_find_or_insert_is_atomic() {
        let registry = Arc::new(DeviceRegistry::in_memory());
        let next = Arc::new(crate::registry::IdAllocator::default());

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let next = Arc::clone(&next);
                tokio::spawn(async move {
                    registry
                        .find_or_insert_with("sensor1", "aabbccddeeff", || {
                            make_device(next.next(), "sensor1")
                        })
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut inserted = 0;
        for task in tasks {
            if let Lookup::Inserted(_) = task.await.unwrap() {
                inserted += 1;
            }
        }

        assert_eq!(inserted, 1);
        assert_eq!(registry.len().await, 1);
        assert_eq!(next.snapshot(), 101);
    }

    #[tokio::test]
    async fn test_merge_adapter_conf() {
        let registry = DeviceRegistry::in_memory();
        registry.upsert(make_device(100, "sensor1")).await.unwrap();

        let conf = json!({"pinset": "26,27", "timeout": 30});
        let later = Utc::now() + chrono::Duration::seconds(5);
        let merged = registry
            .merge_adapter_conf(100, conf.as_object().unwrap().clone(), later)
            .await
            .unwrap();
        assert!(merged);

        let device = registry.find_by_id(100).await.unwrap();
        assert_eq!(device.adapter_conf["pinset"], "26,27");
        assert_eq!(device.last_contact, later);

        assert!(!registry
            .merge_adapter_conf(999, Map::new(), later)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_watch_sets_monitored_flag() {
        let registry = DeviceRegistry::in_memory();
        registry.upsert(make_device(100, "sensor1")).await.unwrap();
        let now = Utc::now();

        assert!(registry.watch(100, 30, now).await.unwrap());
        assert!(!registry.watch(555, 30, now).await.unwrap());

        assert!(registry.find_by_id(100).await.unwrap().monitored);
        let entry = registry.monitoring_entry(100).await.unwrap();
        assert_eq!(entry.timeout, 30);
        assert_eq!(entry.last_contact, now);
    }

    #[tokio::test]
    async fn test_heartbeat_refreshes_device_and_entry() {
        let registry = DeviceRegistry::in_memory();
        let start = Utc::now();
        registry.upsert(make_device(100, "sensor1")).await.unwrap();
        registry.watch(100, 30, start).await.unwrap();

        let later = start + chrono::Duration::seconds(20);
        assert!(registry.heartbeat(100, later).await);
        assert!(!registry.heartbeat(101, later).await);

        assert_eq!(registry.find_by_id(100).await.unwrap().last_contact, later);
        assert_eq!(registry.monitoring_entry(100).await.unwrap().last_contact, later);
    }

    #[tokio::test]
    async fn test_delete_removes_both_stores() {
        let registry = DeviceRegistry::in_memory();
        registry.upsert(make_device(100, "a")).await.unwrap();
        registry.upsert(make_device(101, "b")).await.unwrap();
        registry.watch(100, 30, Utc::now()).await.unwrap();

        let removed = registry.delete(&[100, 102]).await.unwrap();

        assert_eq!(removed, vec![100]);
        assert!(registry.find_by_id(100).await.is_none());
        assert!(registry.monitoring_entry(100).await.is_none());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_retain_monitored_evicts_batch() {
        let registry = DeviceRegistry::in_memory();
        let now = Utc::now();
        for (id, name) in [(100, "a"), (101, "b"), (102, "c")] {
            registry.upsert(make_device(id, name)).await.unwrap();
        }
        registry.watch(100, 30, now).await.unwrap();
        registry.watch(101, 60, now).await.unwrap();

        let later = now + chrono::Duration::seconds(35);
        let evicted = registry
            .retain_monitored(|entry| !entry.is_expired(later))
            .await
            .unwrap();

        assert_eq!(evicted, vec![100]);
        assert!(registry.find_by_id(100).await.is_none());
        assert!(registry.find_by_id(101).await.is_some());
        // Unmonitored devices are never evicted.
        assert!(registry.find_by_id(102).await.is_some());
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let temp = tempfile::tempdir().unwrap();
        let store = StateStore::new(temp.path().to_path_buf()).unwrap();
        let now = Utc::now();

        {
            let registry = DeviceRegistry::open(store.clone()).await.unwrap();
            registry.upsert(make_device(100, "a")).await.unwrap();
            registry.upsert(make_device(105, "b")).await.unwrap();
            registry.watch(105, 15, now).await.unwrap();
        }

        let registry = DeviceRegistry::open(store).await.unwrap();
        assert_eq!(registry.len().await, 2);
        assert_eq!(registry.max_global_id().await, Some(105));
        assert!(registry.find_by_id(105).await.unwrap().monitored);
        assert!(!registry.find_by_id(100).await.unwrap().monitored);
        assert_eq!(registry.monitoring_entries().await.len(), 1);
    }

    #[tokio::test]
    async fn test_heartbeats_persist_on_flush() {
        let temp = tempfile::tempdir().unwrap();
        let store = StateStore::new(temp.path().to_path_buf()).unwrap();
        let start = Utc::now();
        let later = start + chrono::Duration::seconds(10);

        let registry = DeviceRegistry::open(store.clone()).await.unwrap();
        registry.upsert(make_device(100, "a")).await.unwrap();
        registry.watch(100, 30, start).await.unwrap();
        registry.heartbeat(100, later).await;

        assert_eq!(store.load_monitoring().await.unwrap()[0].last_contact, start);

        registry.flush().await.unwrap();
        assert_eq!(store.load_monitoring().await.unwrap()[0].last_contact, later);
    }
}
