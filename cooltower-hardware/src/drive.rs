//! Per-VFD controller
//!
//! Typed commands and decoded status for one drive on the shared bus.
//! Communication failures never escape this boundary: they increment the
//! drive's error counter and surface as `Ok(false)` or a `NoComm` status.
//! Only `BusBusy` (and invalid arguments) come back as `Err`.

use cooltower_core::{
    decode_current, decode_frequency, encode_frequency, unix_millis, CoolTowerError, DriveModel,
    DriveState, DriveStatus, DriveSummary, RegisterMap, Result,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::transaction::TransactionEngine;

/// Default age limit for serving a cached status
pub const DEFAULT_STALENESS: Duration = Duration::from_secs(30);

/// Immutable identity of a drive on the bus
#[derive(Debug, Clone, PartialEq)]
pub struct DriveHandle {
    pub name: String,
    pub device_id: u8,
    pub description: String,
    pub model: DriveModel,
}

#[derive(Debug, Clone)]
struct CachedStatus {
    status: DriveStatus,
    at: Instant,
}

/// Controller for one VFD
pub struct DriveController {
    handle: DriveHandle,
    map: RegisterMap,
    engine: Arc<TransactionEngine>,
    error_count: AtomicU32,
    cache: Mutex<Option<CachedStatus>>,
    staleness: Duration,
}

impl DriveController {
    pub fn new(handle: DriveHandle, engine: Arc<TransactionEngine>, staleness: Duration) -> Self {
        let map = handle.model.register_map();
        Self {
            handle,
            map,
            engine,
            error_count: AtomicU32::new(0),
            cache: Mutex::new(None),
            staleness,
        }
    }

    pub fn handle(&self) -> &DriveHandle {
        &self.handle
    }

    pub fn name(&self) -> &str {
        &self.handle.name
    }

    pub fn device_id(&self) -> u8 {
        self.handle.device_id
    }

    pub fn register_map(&self) -> &RegisterMap {
        &self.map
    }

    /// Forward run
    pub async fn start(&self) -> Result<bool> {
        info!("[{}] Sending START command", self.handle.description);
        self.write(self.map.control, self.map.cmd_forward, "start")
            .await
    }

    pub async fn stop(&self) -> Result<bool> {
        info!("[{}] Sending STOP command", self.handle.description);
        self.write(self.map.control, self.map.cmd_stop, "stop").await
    }

    /// Clear a latched drive fault
    pub async fn reset_fault(&self) -> Result<bool> {
        info!("[{}] Sending FAULT RESET command", self.handle.description);
        self.write(self.map.control, self.map.cmd_fault_reset, "fault reset")
            .await
    }

    /// Write the frequency setpoint.
    ///
    /// The caller clamps `hz` to the drive's operating range; values that
    /// cannot be encoded are rejected with `InvalidInput` before any bus I/O.
    pub async fn set_frequency(&self, hz: f64) -> Result<bool> {
        let raw = encode_frequency(hz)?;
        debug!(
            "[{}] Setting frequency to {:.2} Hz (raw: {})",
            self.handle.description, hz, raw
        );
        self.write(self.map.frequency_setpoint, raw, "set frequency")
            .await
    }

    /// Poll the drive.
    ///
    /// One batched read covers state word 1, state word 2 and the fault code;
    /// running frequency and output current are read separately. If any read
    /// fails, a cached status younger than the staleness window is returned
    /// marked stale, otherwise a `NoComm` status.
    pub async fn get_status(&self) -> Result<DriveStatus> {
        match self.read_status().await {
            Ok(status) => {
                self.store_cache(&status);
                Ok(status)
            }
            Err(e) if e.is_communication_failure() => {
                self.record_failure("status read", &e);
                Ok(self.fallback_status())
            }
            Err(e) => Err(e),
        }
    }

    async fn read_status(&self) -> Result<DriveStatus> {
        let id = self.handle.device_id;
        let block = self
            .engine
            .read_registers(id, self.map.state_word1, self.map.state_block_len())
            .await?;
        let word = |register: u16| -> Result<u16> {
            block
                .get((register - self.map.state_word1) as usize)
                .copied()
                .ok_or_else(|| CoolTowerError::Frame("short state block".to_string()))
        };
        let state1 = word(self.map.state_word1)?;
        let state2 = word(self.map.state_word2)?;
        let fault = word(self.map.fault_code)?;
        self.record_success();

        let frequency = self.read_one(self.map.running_frequency).await?;
        let current = self.read_one(self.map.output_current).await?;

        Ok(DriveStatus {
            state: DriveState::from_code(state1),
            state_word2: state2,
            output_frequency_hz: decode_frequency(frequency),
            output_current_a: decode_current(current),
            fault_code: fault,
            healthy: true,
            stale: false,
            captured_at_ms: unix_millis(),
        })
    }

    async fn read_one(&self, register: u16) -> Result<u16> {
        let values = self
            .engine
            .read_registers(self.handle.device_id, register, 1)
            .await?;
        self.record_success();
        values
            .first()
            .copied()
            .ok_or_else(|| CoolTowerError::Frame("empty register read".to_string()))
    }

    fn fallback_status(&self) -> DriveStatus {
        let cache = self.lock_cache();
        match cache.as_ref() {
            Some(cached) if cached.at.elapsed() <= self.staleness => {
                warn!(
                    "[{}] Live read failed, serving status cached {:?} ago",
                    self.handle.description,
                    cached.at.elapsed()
                );
                cached.status.clone().into_stale()
            }
            _ => DriveStatus::no_comm(),
        }
    }

    fn store_cache(&self, status: &DriveStatus) {
        *self.lock_cache() = Some(CachedStatus {
            status: status.clone(),
            at: Instant::now(),
        });
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, Option<CachedStatus>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Most recent successful status, without bus I/O.
    pub fn cached_status(&self) -> Option<DriveStatus> {
        self.lock_cache().as_ref().map(|c| c.status.clone())
    }

    /// True while the error counter is below `max_errors`.
    pub fn is_healthy(&self, max_errors: u32) -> bool {
        self.error_count() < max_errors
    }

    /// Failed transactions since the last success
    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::SeqCst)
    }

    pub fn reset_errors(&self) {
        self.error_count.store(0, Ordering::SeqCst);
    }

    pub fn summary(&self, max_errors: u32) -> DriveSummary {
        DriveSummary {
            name: self.handle.name.clone(),
            device_id: self.handle.device_id,
            description: self.handle.description.clone(),
            healthy: self.is_healthy(max_errors),
            error_count: self.error_count(),
        }
    }

    async fn write(&self, register: u16, value: u16, what: &str) -> Result<bool> {
        match self
            .engine
            .write_register(self.handle.device_id, register, value)
            .await
        {
            Ok(()) => {
                self.record_success();
                Ok(true)
            }
            Err(e) if e.is_communication_failure() => {
                self.record_failure(what, &e);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn record_success(&self) {
        self.error_count.store(0, Ordering::SeqCst);
    }

    fn record_failure(&self, what: &str, err: &CoolTowerError) {
        let count = self.error_count.fetch_add(1, Ordering::SeqCst) + 1;
        error!(
            "[{}] {} failed ({} consecutive): {}",
            self.handle.description, what, count, err
        );
    }
}
