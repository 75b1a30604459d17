//! Shared data model for registered devices.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::protocol::message::TIMEOUT;

/// Server-assigned device identifier. `0` is never assigned and means "none".
pub type GlobalId = i64;

/// A registered device.
///
/// `(local_id, hw_address)` identifies one physical device across reconnects;
/// `global_id` is assigned once and never changes while the record exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub global_id: GlobalId,
    pub local_id: String,
    /// Lowercase hex, no separators.
    #[serde(rename = "dev_hw_addr")]
    pub hw_address: String,
    #[serde(rename = "dev_ip", default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(rename = "type")]
    pub device_type: String,
    /// Global id of the device hosting this sensor/actuator, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<GlobalId>,
    #[serde(default)]
    pub adapter_conf: Map<String, Value>,
    /// Mirrors whether a monitoring entry exists for this device.
    #[serde(default)]
    pub monitored: bool,
    pub last_contact: DateTime<Utc>,
}

impl DeviceRecord {
    /// Timeout declared in the adapter configuration, in seconds.
    pub fn configured_timeout(&self) -> Option<u64> {
        self.adapter_conf
            .get(TIMEOUT)
            .and_then(parse_timeout)
            .filter(|t| *t > 0)
    }
}

/// Heartbeat bookkeeping for a device that declared a timeout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringEntry {
    pub global_id: GlobalId,
    /// Maximum allowed silence in seconds.
    pub timeout: u64,
    pub last_contact: DateTime<Utc>,
}

impl MonitoringEntry {
    /// True once the silence since `last_contact` exceeds `timeout`.
    ///
    /// A timeout too large for `chrono::Duration` never expires.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let Some(limit) = i64::try_from(self.timeout)
            .ok()
            .and_then(chrono::Duration::try_seconds)
        else {
            return false;
        };
        now.signed_duration_since(self.last_contact) > limit
    }
}

/// Normalize a hardware address to lowercase hex without separators.
pub fn normalize_hw_address(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_hexdigit())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Read a timeout in seconds from a JSON value.
///
/// Devices send integers, floats or numeric strings; fractional values round up.
pub fn parse_timeout(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0)
                .map(|f| f.ceil() as u64)
        }),
        Value::String(s) => s.trim().parse::<f64>().ok().and_then(|f| {
            if f.is_finite() && f >= 0.0 {
                Some(f.ceil() as u64)
            } else {
                None
            }
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_hw_address() {
        assert_eq!(normalize_hw_address("AA:BB:CC:DD:EE:FF"), "aabbccddeeff");
        assert_eq!(normalize_hw_address("aa-bb-cc-dd-ee-ff"), "aabbccddeeff");
        assert_eq!(normalize_hw_address("aabbccddeeff"), "aabbccddeeff");
    }

    #[test]
    fn test_parse_timeout() {
        assert_eq!(parse_timeout(&json!(30)), Some(30));
        assert_eq!(parse_timeout(&json!(29.2)), Some(30));
        assert_eq!(parse_timeout(&json!("15")), Some(15));
        assert_eq!(parse_timeout(&json!(-3)), None);
        assert_eq!(parse_timeout(&json!("soon")), None);
        assert_eq!(parse_timeout(&json!(null)), None);
    }

    #[test]
    fn test_monitoring_entry_expiry() {
        let start = Utc::now();
        let entry = MonitoringEntry {
            global_id: 100,
            timeout: 30,
            last_contact: start,
        };

        assert!(!entry.is_expired(start + chrono::Duration::seconds(30)));
        assert!(entry.is_expired(start + chrono::Duration::seconds(31)));
    }

    #[test]
    fn test_huge_timeout_never_expires() {
        let start = Utc::now();
        for timeout in [10_000_000_000_000_000, u64::MAX] {
            let entry = MonitoringEntry {
                global_id: 100,
                timeout,
                last_contact: start,
            };
            assert!(!entry.is_expired(start + chrono::Duration::days(365 * 100)));
        }
    }

    #[test]
    fn test_device_record_wire_names() {
        let record = DeviceRecord {
            global_id: 100,
            local_id: "sensor1".to_string(),
            hw_address: "aabbccddeeff".to_string(),
            ip: Some("10.0.0.5".to_string()),
            device_type: "temp".to_string(),
            host: None,
            adapter_conf: Map::new(),
            monitored: false,
            last_contact: Utc::now(),
        };

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["dev_hw_addr"], "aabbccddeeff");
        assert_eq!(value["dev_ip"], "10.0.0.5");
        assert_eq!(value["type"], "temp");
        assert!(value.get("host").is_none());
    }
}
