//! cooltower-control
//!
//! Control logic that sits above the drive controllers. Each controller is
//! plain owned state driven by a single task; none of them hold locks or
//! talk to the bus except through [`cooltower_hardware::DriveController`].
//!
//! - `failover::FailoverController` - primary/backup pump state machine
//! - `fan::FanController` - manual and temperature-driven fan control
//! - `pressure::PumpSpeedLaw` - pressure-driven pump frequency

pub mod failover;
pub mod fan;
pub mod pressure;

pub use failover::{FailoverController, Transition};
pub use fan::{FanAction, FanController};
pub use pressure::PumpSpeedLaw;

use cooltower_core::Result;
use tracing::warn;

/// Collapse a drive command result into success or failure.
///
/// Communication failures already arrive as `Ok(false)`; an `Err` (bus busy)
/// is logged and counts as a failed command.
pub(crate) fn command_ok(drive: &str, what: &str, result: Result<bool>) -> bool {
    match result {
        Ok(ok) => ok,
        Err(e) => {
            warn!("{} on '{}' not sent: {}", what, drive, e);
            false
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;
    use std::time::Duration;

    use cooltower_hardware::{
        BusArbiter, DriveRegistry, RetryPolicy, SimulatedBus, TransactionEngine,
        TransactionTiming, DEFAULT_STALENESS,
    };

    /// Registry over a simulator with the default drive layout attached.
    pub async fn registry() -> (SimulatedBus, DriveRegistry) {
        let sim = SimulatedBus::new();
        for id in 1..=3 {
            sim.add_device(id);
        }
        let bus = Arc::new(BusArbiter::new(
            Box::new(sim.clone()),
            Duration::from_millis(500),
        ));
        let engine = Arc::new(TransactionEngine::new(
            bus,
            TransactionTiming {
                settle: Duration::from_millis(1),
                response_timeout: Duration::from_millis(5),
            },
            RetryPolicy::none(),
        ));
        let registry = DriveRegistry::new(engine, DEFAULT_STALENESS);
        registry
            .add_drive("pump_primary", 1, "Primary Pump")
            .await
            .unwrap();
        registry
            .add_drive("pump_backup", 2, "Backup Pump")
            .await
            .unwrap();
        registry.add_drive("fan", 3, "Cooling Tower Fan").await.unwrap();
        (sim, registry)
    }
}
