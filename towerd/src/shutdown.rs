//! Shutdown handling for graceful daemon termination
//!
//! Leaves the tower in a known state: the control loop stops the fan and the
//! active pump, then every registered drive gets a stop command if the
//! configuration asks for it.

use crate::config::RuntimeConfig;
use crate::supervisor::SupervisorHandle;
use cooltower_hardware::{DriveRegistry, StopAllReport};
use std::sync::Arc;
use tracing::{info, warn};

/// Stop the control loop and, when enabled, every drive on the bus.
///
/// Returns the stop report, or `None` when drive stopping is disabled.
pub async fn stop_tower(
    runtime_config: &Arc<RuntimeConfig>,
    control: &SupervisorHandle,
    registry: &DriveRegistry,
) -> Option<StopAllReport> {
    info!("Stopping control loop...");
    control.shutdown().await;

    if !runtime_config.static_config().shutdown.stop_drives {
        info!("Drive stop on shutdown disabled in config");
        return None;
    }

    let report = registry.stop_all().await;
    if report.failed.is_empty() {
        info!("All drives stopped: {}", report.stopped.join(", "));
    } else {
        warn!(
            "Drives did not acknowledge stop: {}",
            report.failed.join(", ")
        );
    }
    Some(report)
}
