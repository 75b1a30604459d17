//! Advertiser settings and the autodeploy file.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::AdvertiseError;
use crate::gateway::{DEFAULT_PORT, SERVICE_TYPE};
use crate::protocol::message::TIMEOUT;
use crate::protocol::DISCOVERY_RETRY_INTERVAL;
use crate::types::parse_timeout;

/// One device managed by the advertiser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSpec {
    pub local_id: String,
    #[serde(rename = "type")]
    pub device_type: String,
    #[serde(default)]
    pub adapter_conf: Map<String, Value>,
}

impl DeviceSpec {
    /// Heartbeat timeout declared in `adapter_conf`.
    pub fn timeout(&self) -> Option<Duration> {
        self.adapter_conf
            .get(TIMEOUT)
            .and_then(parse_timeout)
            .filter(|t| *t > 0)
            .map(Duration::from_secs)
    }
}

/// Devices to deploy: an optional hosting device plus the devices attached
/// to it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutodeployConfig {
    #[serde(rename = "self", default, skip_serializing_if = "Option::is_none")]
    pub host: Option<DeviceSpec>,
    #[serde(default)]
    pub devices: Vec<DeviceSpec>,
}

impl AutodeployConfig {
    pub fn from_json(content: &str) -> Result<Self, AdvertiseError> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| AdvertiseError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub async fn load(path: &Path) -> Result<Self, AdvertiseError> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            AdvertiseError::InvalidConfig(format!("{}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    /// Every device must declare a positive timeout and local ids must be
    /// unique.
    pub fn validate(&self) -> Result<(), AdvertiseError> {
        if self.host.is_none() && self.devices.is_empty() {
            return Err(AdvertiseError::InvalidConfig(
                "no devices to deploy".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for spec in self.all() {
            if spec.local_id.is_empty() {
                return Err(AdvertiseError::InvalidConfig(
                    "device with empty local_id".to_string(),
                ));
            }
            if !seen.insert(spec.local_id.as_str()) {
                return Err(AdvertiseError::InvalidConfig(format!(
                    "duplicate local_id '{}'",
                    spec.local_id
                )));
            }
            if spec.timeout().is_none() {
                return Err(AdvertiseError::InvalidConfig(format!(
                    "device '{}' has no positive adapter_conf.timeout",
                    spec.local_id
                )));
            }
        }
        Ok(())
    }

    /// Host first, then attached devices.
    pub fn all(&self) -> impl Iterator<Item = &DeviceSpec> {
        self.host.iter().chain(self.devices.iter())
    }

    /// Smallest declared timeout.
    pub fn min_timeout(&self) -> Option<Duration> {
        self.all().filter_map(DeviceSpec::timeout).min()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    #[default]
    Lan,
    Bluetooth,
}

/// Advertiser settings.
#[derive(Debug, Clone)]
pub struct AdvertiseConfig {
    pub transport: TransportKind,
    pub port: u16,
    pub service_type: String,
    /// How long to browse DNS-SD before falling back to broadcast.
    pub dnssd_window: Duration,
    pub receive_timeout: Duration,
    pub discovery_tries: u32,
    pub advertise_tries: u32,
    pub retry_sleep: Duration,
    /// Where assigned global ids are persisted.
    pub ids_file: Option<PathBuf>,
}

impl Default for AdvertiseConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Lan,
            port: DEFAULT_PORT,
            service_type: SERVICE_TYPE.to_string(),
            dnssd_window: Duration::from_secs(5),
            receive_timeout: DISCOVERY_RETRY_INTERVAL,
            discovery_tries: 5,
            advertise_tries: 5,
            retry_sleep: DISCOVERY_RETRY_INTERVAL,
            ids_file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AUTODEPLOY: &str = r#"{
        "self": {"local_id": "pi", "type": "raspberry", "adapter_conf": {"timeout": 60}},
        "devices": [
            {"local_id": "dht", "type": "dht22", "adapter_conf": {"timeout": 20, "pinset": "4"}},
            {"local_id": "relay", "type": "relay", "adapter_conf": {"timeout": "30"}}
        ]
    }"#;

    #[test]
    fn test_parse_autodeploy() {
        let config = AutodeployConfig::from_json(AUTODEPLOY).unwrap();

        assert_eq!(config.host.as_ref().unwrap().local_id, "pi");
        assert_eq!(config.devices.len(), 2);
        assert_eq!(config.devices[0].adapter_conf["pinset"], "4");
        assert_eq!(config.min_timeout(), Some(Duration::from_secs(20)));

        let order: Vec<_> = config.all().map(|d| d.local_id.as_str()).collect();
        assert_eq!(order, ["pi", "dht", "relay"]);
    }

    #[test]
    fn test_missing_timeout_is_rejected() {
        let err = AutodeployConfig::from_json(
            r#"{"devices": [{"local_id": "a", "type": "t", "adapter_conf": {}}]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn test_duplicate_local_id_is_rejected() {
        let err = AutodeployConfig::from_json(
            r#"{"devices": [
                {"local_id": "a", "type": "t", "adapter_conf": {"timeout": 5}},
                {"local_id": "a", "type": "t", "adapter_conf": {"timeout": 5}}
            ]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_empty_file_is_rejected() {
        assert!(AutodeployConfig::from_json("{}").is_err());
        assert!(AutodeployConfig::from_json("not json").is_err());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("autodeploy.json");
        std::fs::write(&path, AUTODEPLOY).unwrap();

        let config = AutodeployConfig::load(&path).await.unwrap();
        assert_eq!(config.all().count(), 3);

        assert!(AutodeployConfig::load(&temp.path().join("missing.json"))
            .await
            .is_err());
    }
}
