//! Devices command - list the registry persisted by a gateway.

use std::path::PathBuf;

use rmp_discovery_core::storage::StateStore;

use super::resolve_data_dir;
use crate::cli::DevicesArgs;
use crate::error::Result;
use crate::output::get_formatter;

/// Run the devices command
pub async fn run_devices(args: DevicesArgs, data_dir: Option<PathBuf>, json: bool) -> Result<()> {
    let store = StateStore::new(resolve_data_dir(data_dir)?)?;

    let mut devices = store.load_devices().await?;
    let monitoring = store.load_monitoring().await?;

    if args.monitored {
        devices.retain(|d| monitoring.iter().any(|m| m.global_id == d.global_id));
    }
    devices.sort_by_key(|d| d.global_id);

    let formatter = get_formatter(json);
    println!("{}", formatter.format_devices(&devices, &monitoring));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_devices_on_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let args = DevicesArgs { monitored: false };
        run_devices(args, Some(dir.path().to_path_buf()), true)
            .await
            .unwrap();
    }
}
