//! Heartbeat-timeout monitor.
//!
//! Periodically evicts every monitored device whose silence exceeds its
//! declared timeout. Eviction is the only way a device leaves the registry.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::error::StorageError;
use crate::registry::DeviceRegistry;
use crate::types::GlobalId;

/// Default interval between scans.
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(5);

pub struct Monitor {
    registry: Arc<DeviceRegistry>,
    scan_interval: Duration,
}

impl Monitor {
    pub fn new(registry: Arc<DeviceRegistry>, scan_interval: Duration) -> Self {
        Self {
            registry,
            scan_interval,
        }
    }

    /// Run one scan as of `now` and return the evicted ids.
    pub async fn scan(&self, now: DateTime<Utc>) -> Result<Vec<GlobalId>, StorageError> {
        let evicted = self
            .registry
            .retain_monitored(|entry| !entry.is_expired(now))
            .await?;

        if evicted.is_empty() {
            debug!("monitor scan: nothing expired");
        } else {
            info!(?evicted, "evicted silent devices");
        }

        Ok(evicted)
    }

    /// Scan every interval until shutdown is signalled.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.scan_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval = ?self.scan_interval, "monitor started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.scan(Utc::now()).await {
                        error!(error = %e, "monitor scan failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("monitor stopped");
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
