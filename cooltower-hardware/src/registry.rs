//! Drive registry
//!
//! Owns the shared transaction engine (and through it the bus arbiter) and
//! the named drive controllers that use it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use cooltower_core::config::StaticConfig;
use cooltower_core::protocol::validate_device_id;
use cooltower_core::{CoolTowerError, DriveModel, DriveSummary, Result};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::bus::{BusArbiter, ProcessLock};
use crate::drive::{DriveController, DriveHandle};
use crate::serial_driver::RtuTransport;
use crate::transaction::TransactionEngine;

/// Outcome of [`DriveRegistry::stop_all`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopAllReport {
    pub stopped: Vec<String>,
    pub failed: Vec<String>,
}

/// Registry of named drives sharing one bus
///
/// # Example
///
/// ```ignore
/// let registry = DriveRegistry::new(engine, Duration::from_secs(30));
/// registry.add_drive("fan", 3, "Cooling Tower Fan").await?;
///
/// let fan = registry.get_or_err("fan").await?;
/// fan.start().await?;
/// ```
pub struct DriveRegistry {
    engine: Arc<TransactionEngine>,
    staleness: Duration,
    drives: RwLock<BTreeMap<String, Arc<DriveController>>>,
}

impl DriveRegistry {
    /// Create an empty registry on top of `engine`.
    pub fn new(engine: Arc<TransactionEngine>, staleness: Duration) -> Self {
        Self {
            engine,
            staleness,
            drives: RwLock::new(BTreeMap::new()),
        }
    }

    /// Build the engine, arbiter, and every configured drive over `transport`.
    pub async fn from_config(
        transport: Box<dyn RtuTransport>,
        config: &StaticConfig,
    ) -> Result<Self> {
        let serial = &config.serial;
        let mut bus = BusArbiter::new(transport, Duration::from_millis(serial.bus_lock_timeout_ms));
        if serial.process_lock {
            info!("Using bus lock file {}", serial.lock_file.display());
            bus = bus.with_process_lock(ProcessLock::new(
                serial.lock_file.clone(),
                Duration::from_millis(serial.process_lock_timeout_ms),
            )?);
        }
        let engine = Arc::new(TransactionEngine::from_config(Arc::new(bus), serial));
        let registry = Self::new(engine, Duration::from_secs(config.status_cache.staleness_secs));

        for drive in &config.drives {
            registry
                .add_drive_with_model(&drive.name, drive.device_id, &drive.description, drive.model)
                .await?;
        }
        Ok(registry)
    }

    pub fn engine(&self) -> &Arc<TransactionEngine> {
        &self.engine
    }

    /// Register a G540 drive.
    pub async fn add_drive(&self, name: &str, device_id: u8, description: &str) -> Result<()> {
        self.add_drive_with_model(name, device_id, description, DriveModel::default())
            .await
    }

    /// Register a drive of a specific model.
    ///
    /// Returns error if the name is taken or the address is out of range.
    pub async fn add_drive_with_model(
        &self,
        name: &str,
        device_id: u8,
        description: &str,
        model: DriveModel,
    ) -> Result<()> {
        validate_device_id(device_id)?;

        let mut drives = self.drives.write().await;
        if drives.contains_key(name) {
            return Err(CoolTowerError::DuplicateDrive(name.to_string()));
        }

        let handle = DriveHandle {
            name: name.to_string(),
            device_id,
            description: description.to_string(),
            model,
        };
        drives.insert(
            name.to_string(),
            Arc::new(DriveController::new(
                handle,
                self.engine.clone(),
                self.staleness,
            )),
        );
        info!(
            "Added drive '{}': {} (Device ID: {}, {})",
            name,
            description,
            device_id,
            model.name()
        );
        Ok(())
    }

    /// Get a drive by name
    pub async fn get_drive(&self, name: &str) -> Option<Arc<DriveController>> {
        self.drives.read().await.get(name).cloned()
    }

    /// Get a drive by name, returning an error if not found
    pub async fn get_or_err(&self, name: &str) -> Result<Arc<DriveController>> {
        self.get_drive(name)
            .await
            .ok_or_else(|| CoolTowerError::DriveNotFound(name.to_string()))
    }

    /// All drives, ordered by name
    pub async fn list(&self) -> Vec<Arc<DriveController>> {
        self.drives.read().await.values().cloned().collect()
    }

    pub async fn names(&self) -> Vec<String> {
        self.drives.read().await.keys().cloned().collect()
    }

    pub async fn summaries(&self, max_errors: u32) -> Vec<DriveSummary> {
        self.list()
            .await
            .iter()
            .map(|d| d.summary(max_errors))
            .collect()
    }

    /// Stop every drive, continuing past individual failures.
    pub async fn stop_all(&self) -> StopAllReport {
        info!("Stopping all drives...");
        let mut report = StopAllReport::default();
        for drive in self.list().await {
            match drive.stop().await {
                Ok(true) => report.stopped.push(drive.name().to_string()),
                Ok(false) => report.failed.push(drive.name().to_string()),
                Err(e) => {
                    warn!("Could not stop '{}': {}", drive.name(), e);
                    report.failed.push(drive.name().to_string());
                }
            }
        }
        report
    }
}

impl std::fmt::Debug for DriveRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriveRegistry")
            .field("staleness", &self.staleness)
            .finish_non_exhaustive()
    }
}
