//! Table-formatted output for CLI.

use std::collections::BTreeMap;

use chrono::Utc;
use colored::*;
use comfy_table::{Cell, Color, ContentArrangement, Table};
use rmp_discovery_core::advertise::DiscoveredGateway;
use rmp_discovery_core::{DeviceRecord, GlobalId, MonitoringEntry};

use super::OutputFormatter;

pub struct TableOutput;

impl TableOutput {
    pub fn new() -> Self {
        Self
    }

    fn heartbeat_cell(entry: Option<&MonitoringEntry>) -> Cell {
        match entry {
            None => Cell::new("-"),
            Some(entry) if entry.is_expired(Utc::now()) => {
                Cell::new(format!("{}s (late)", entry.timeout)).fg(Color::Red)
            }
            Some(entry) => Cell::new(format!("{}s", entry.timeout)).fg(Color::Green),
        }
    }
}

impl Default for TableOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputFormatter for TableOutput {
    fn format_devices(&self, devices: &[DeviceRecord], monitoring: &[MonitoringEntry]) -> String {
        if devices.is_empty() {
            return "No devices registered.".to_string();
        }

        let mut table = Table::new();
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec![
            "Global ID",
            "Local ID",
            "Type",
            "HW Addr",
            "IP",
            "Host",
            "Timeout",
            "Last Contact",
        ]);

        for device in devices {
            let entry = monitoring.iter().find(|m| m.global_id == device.global_id);
            table.add_row(vec![
                Cell::new(device.global_id),
                Cell::new(&device.local_id),
                Cell::new(&device.device_type),
                Cell::new(&device.hw_address),
                Cell::new(device.ip.as_deref().unwrap_or("-")),
                Cell::new(
                    device
                        .host
                        .map(|h| h.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                ),
                Self::heartbeat_cell(entry),
                Cell::new(device.last_contact.format("%Y-%m-%d %H:%M:%S").to_string()),
            ]);
        }

        format!("{}\n\nFound {} device(s)", table, devices.len())
    }

    fn format_gateway(&self, gateway: &DiscoveredGateway) -> String {
        let lines = [
            format!("{} {}", "Gateway:".green(), gateway.address),
            format!("  Local IP:  {}", gateway.local_ip.as_deref().unwrap_or("-")),
            format!("  HW Addr:   {}", gateway.hw_address),
        ];
        lines.join("\n")
    }

    fn format_registrations(&self, ids: &BTreeMap<String, GlobalId>) -> String {
        if ids.is_empty() {
            return "No device registered.".to_string();
        }

        let mut table = Table::new();
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec!["Local ID", "Global ID"]);
        for (local_id, global_id) in ids {
            table.add_row(vec![Cell::new(local_id), Cell::new(global_id)]);
        }
        table.to_string()
    }

    fn format_message(&self, message: &str) -> String {
        message.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn record(global_id: GlobalId, local_id: &str) -> DeviceRecord {
        DeviceRecord {
            global_id,
            local_id: local_id.to_string(),
            hw_address: "aabbccddeeff".to_string(),
            ip: Some("192.168.1.20".to_string()),
            device_type: "sensor".to_string(),
            host: Some(100),
            adapter_conf: Map::new(),
            monitored: false,
            last_contact: Utc::now(),
        }
    }

    #[test]
    fn test_format_devices_empty() {
        let output = TableOutput::new().format_devices(&[], &[]);
        assert_eq!(output, "No devices registered.");
    }

    #[test]
    fn test_format_devices_lists_rows() {
        let devices = vec![record(101, "temp"), record(102, "relay")];
        let monitoring = vec![MonitoringEntry {
            global_id: 101,
            timeout: 30,
            last_contact: Utc::now(),
        }];

        let output = TableOutput::new().format_devices(&devices, &monitoring);
        assert!(output.contains("temp"));
        assert!(output.contains("relay"));
        assert!(output.contains("30s"));
        assert!(output.contains("Found 2 device(s)"));
    }
}
