//! JSON-formatted output for CLI.

use std::collections::BTreeMap;

use rmp_discovery_core::advertise::DiscoveredGateway;
use rmp_discovery_core::{DeviceRecord, GlobalId, MonitoringEntry};
use serde::Serialize;
use serde_json::json;

use super::OutputFormatter;

pub struct JsonOutput;

impl JsonOutput {
    pub fn new() -> Self {
        Self
    }

    fn to_json<T: Serialize>(value: &T) -> String {
        serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
    }
}

impl Default for JsonOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputFormatter for JsonOutput {
    fn format_devices(&self, devices: &[DeviceRecord], monitoring: &[MonitoringEntry]) -> String {
        Self::to_json(&json!({
            "devices": devices,
            "monitoring": monitoring,
            "count": devices.len()
        }))
    }

    fn format_gateway(&self, gateway: &DiscoveredGateway) -> String {
        Self::to_json(&json!({
            "address": gateway.address,
            "local_ip": gateway.local_ip,
            "hw_address": gateway.hw_address
        }))
    }

    fn format_registrations(&self, ids: &BTreeMap<String, GlobalId>) -> String {
        Self::to_json(&json!({ "ids": ids, "count": ids.len() }))
    }

    fn format_message(&self, message: &str) -> String {
        Self::to_json(&json!({ "message": message }))
    }
}
