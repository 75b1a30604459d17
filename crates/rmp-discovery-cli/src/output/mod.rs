//! Output formatting for CLI results.

pub mod json;
pub mod table;

pub use json::JsonOutput;
pub use table::TableOutput;

use std::collections::BTreeMap;

use rmp_discovery_core::advertise::DiscoveredGateway;
use rmp_discovery_core::{DeviceRecord, GlobalId, MonitoringEntry};

/// Output formatter trait
pub trait OutputFormatter {
    /// Format the registered devices with their heartbeat entries
    fn format_devices(&self, devices: &[DeviceRecord], monitoring: &[MonitoringEntry]) -> String;

    /// Format a gateway that answered a probe
    fn format_gateway(&self, gateway: &DiscoveredGateway) -> String;

    /// Format the ids assigned to the advertised devices
    fn format_registrations(&self, ids: &BTreeMap<String, GlobalId>) -> String;

    /// Format a generic message
    fn format_message(&self, message: &str) -> String;
}

/// Get the appropriate formatter based on JSON flag
pub fn get_formatter(json: bool) -> Box<dyn OutputFormatter> {
    if json {
        Box::new(JsonOutput::new())
    } else {
        Box::new(TableOutput::new())
    }
}
