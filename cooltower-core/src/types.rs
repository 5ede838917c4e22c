//! Core types and data structures for the cooling tower supervisor

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{CoolTowerError, Result};

/// Frequency registers are expressed in 0.01 Hz units
pub const FREQUENCY_SCALE: f64 = 100.0;

/// Current registers are expressed in 0.1 A units
pub const CURRENT_SCALE: f64 = 10.0;

/// Milliseconds since the Unix epoch, used to timestamp snapshots.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Encode a frequency in Hz as a 0.01 Hz register value.
///
/// # Errors
///
/// Returns `InvalidInput` for non-finite, negative, or unrepresentable values.
pub fn encode_frequency(hz: f64) -> Result<u16> {
    if !hz.is_finite() || hz < 0.0 {
        return Err(CoolTowerError::InvalidInput(format!(
            "Frequency must be a finite, non-negative number, got {}",
            hz
        )));
    }
    let raw = (hz * FREQUENCY_SCALE).round();
    if raw > u16::MAX as f64 {
        return Err(CoolTowerError::InvalidInput(format!(
            "Frequency {:.2} Hz exceeds register range",
            hz
        )));
    }
    Ok(raw as u16)
}

/// Decode a 0.01 Hz register value into Hz.
pub fn decode_frequency(raw: u16) -> f64 {
    raw as f64 / FREQUENCY_SCALE
}

/// Decode a 0.1 A register value into amps.
pub fn decode_current(raw: u16) -> f64 {
    raw as f64 / CURRENT_SCALE
}

/// Drive run state as reported by state word 1.
///
/// The mapping is total: any code the register map does not name decodes to
/// `Unknown` with the raw value preserved. `NoComm` is never read from a
/// device; it marks a status produced without live or fresh cached data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "code")]
pub enum DriveState {
    Forward,
    Reverse,
    Stopped,
    Fault,
    PowerOff,
    PreExcited,
    Unknown(u16),
    NoComm,
}

impl DriveState {
    /// Decode a raw state word.
    pub fn from_code(code: u16) -> Self {
        match code {
            0x0001 => DriveState::Forward,
            0x0002 => DriveState::Reverse,
            0x0003 => DriveState::Stopped,
            0x0004 => DriveState::Fault,
            0x0005 => DriveState::PowerOff,
            0x0006 => DriveState::PreExcited,
            other => DriveState::Unknown(other),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DriveState::Forward => "Forward",
            DriveState::Reverse => "Reverse",
            DriveState::Stopped => "Stopped",
            DriveState::Fault => "Fault",
            DriveState::PowerOff => "PowerOff",
            DriveState::PreExcited => "PreExcited",
            DriveState::Unknown(_) => "Unknown",
            DriveState::NoComm => "NoComm",
        }
    }

    /// Whether the motor is being driven.
    pub fn is_running(&self) -> bool {
        matches!(self, DriveState::Forward | DriveState::Reverse)
    }
}

impl std::fmt::Display for DriveState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriveState::Unknown(code) => write!(f, "Unknown(0x{:04X})", code),
            other => f.write_str(other.name()),
        }
    }
}

/// Decoded drive status from one poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriveStatus {
    /// Decoded state word 1
    pub state: DriveState,
    /// Raw state word 2
    pub state_word2: u16,
    /// Output frequency in Hz
    pub output_frequency_hz: f64,
    /// Output current in A
    pub output_current_a: f64,
    /// Raw fault code (0 means no fault)
    pub fault_code: u16,
    /// False when served from cache or when no data is available
    pub healthy: bool,
    /// True when the value came from the status cache
    pub stale: bool,
    /// When the underlying data was read (Unix milliseconds)
    pub captured_at_ms: u64,
}

impl DriveStatus {
    /// Status for a drive that cannot be reached and has no fresh cache.
    pub fn no_comm() -> Self {
        Self {
            state: DriveState::NoComm,
            state_word2: 0,
            output_frequency_hz: 0.0,
            output_current_a: 0.0,
            fault_code: 0,
            healthy: false,
            stale: false,
            captured_at_ms: unix_millis(),
        }
    }

    /// Mark a cached status as served in place of a failed live read.
    pub fn into_stale(mut self) -> Self {
        self.healthy = false;
        self.stale = true;
        self
    }

    /// Whether this status reflects a live read.
    pub fn is_live(&self) -> bool {
        !self.stale && self.state != DriveState::NoComm
    }

    /// Require live data.
    ///
    /// # Errors
    ///
    /// `StaleData` when served from cache, `CommLost` when no data exists.
    pub fn ensure_live(&self, drive: &str) -> Result<&Self> {
        if self.state == DriveState::NoComm {
            return Err(CoolTowerError::CommLost(drive.to_string()));
        }
        if self.stale {
            let age_ms = unix_millis().saturating_sub(self.captured_at_ms);
            return Err(CoolTowerError::StaleData {
                drive: drive.to_string(),
                age_secs: age_ms as f64 / 1000.0,
            });
        }
        Ok(self)
    }
}

/// Which pump the failover controller currently runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailoverRole {
    Primary,
    Backup,
    /// Both pumps unavailable; no automatic transitions leave this state
    Failed,
}

impl std::fmt::Display for FailoverRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FailoverRole::Primary => "primary",
            FailoverRole::Backup => "backup",
            FailoverRole::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Failover controller status report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailoverStatus {
    pub active_role: FailoverRole,
    /// Name of the drive currently running, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_drive: Option<String>,
    pub primary_healthy: bool,
    pub backup_healthy: bool,
    pub primary_errors: u32,
    pub backup_errors: u32,
    /// Status of the active drive, when one was read
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_drive_status: Option<DriveStatus>,
    /// Unix milliseconds of the last health check that ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_check_ms: Option<u64>,
}

/// Fan control mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FanMode {
    Manual,
    Auto,
}

impl std::str::FromStr for FanMode {
    type Err = CoolTowerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "manual" => Ok(FanMode::Manual),
            "auto" => Ok(FanMode::Auto),
            _ => Err(CoolTowerError::InvalidInput(format!(
                "Unknown fan mode: '{}'. Valid options: manual, auto",
                s
            ))),
        }
    }
}

/// Parameters of the automatic fan control law.
///
/// Temperatures are in °F, frequencies in Hz, `kp` in Hz per °F.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FanAutoParams {
    pub target_temp: f64,
    pub hysteresis: f64,
    pub min_hz: f64,
    pub max_hz: f64,
    pub kp: f64,
    pub anti_freeze_temp: f64,
}

impl Default for FanAutoParams {
    fn default() -> Self {
        Self {
            target_temp: 75.0,
            hysteresis: 5.0,
            min_hz: 20.0,
            max_hz: 60.0,
            kp: 2.0,
            anti_freeze_temp: 45.0,
        }
    }
}

impl FanAutoParams {
    /// Validate the parameter set.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("target_temp", self.target_temp),
            ("hysteresis", self.hysteresis),
            ("min_hz", self.min_hz),
            ("max_hz", self.max_hz),
            ("kp", self.kp),
            ("anti_freeze_temp", self.anti_freeze_temp),
        ];
        if let Some((name, _)) = fields.iter().find(|(_, v)| !v.is_finite()) {
            return Err(CoolTowerError::InvalidInput(format!(
                "{} must be a finite number",
                name
            )));
        }
        if self.min_hz < 0.0 || self.min_hz > self.max_hz {
            return Err(CoolTowerError::InvalidInput(format!(
                "Fan range must satisfy 0 <= min_hz <= max_hz, got {}..{}",
                self.min_hz, self.max_hz
            )));
        }
        if self.hysteresis < 0.0 {
            return Err(CoolTowerError::InvalidInput(format!(
                "hysteresis must be >= 0, got {}",
                self.hysteresis
            )));
        }
        if self.kp < 0.0 {
            return Err(CoolTowerError::InvalidInput(format!(
                "kp must be >= 0, got {}",
                self.kp
            )));
        }
        Ok(())
    }

    /// Proportional law: `clamp(min + (temp - target) * kp, min, max)`.
    pub fn frequency_for(&self, temp: f64) -> f64 {
        let hz = self.min_hz + (temp - self.target_temp) * self.kp;
        hz.clamp(self.min_hz, self.max_hz)
    }

    /// Temperature at or above which a stopped fan starts.
    pub fn start_threshold(&self) -> f64 {
        self.target_temp + self.hysteresis
    }
}

/// Partial update of [`FanAutoParams`]; absent fields keep their value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FanAutoParamsUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_temp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hysteresis: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_hz: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_hz: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anti_freeze_temp: Option<f64>,
}

impl FanAutoParamsUpdate {
    /// Overlay this update on `base`.
    pub fn apply_to(&self, base: FanAutoParams) -> FanAutoParams {
        FanAutoParams {
            target_temp: self.target_temp.unwrap_or(base.target_temp),
            hysteresis: self.hysteresis.unwrap_or(base.hysteresis),
            min_hz: self.min_hz.unwrap_or(base.min_hz),
            max_hz: self.max_hz.unwrap_or(base.max_hz),
            kp: self.kp.unwrap_or(base.kp),
            anti_freeze_temp: self.anti_freeze_temp.unwrap_or(base.anti_freeze_temp),
        }
    }
}

/// Fan controller status report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanStatus {
    pub mode: FanMode,
    pub manual_setpoint_hz: f64,
    pub running: bool,
    /// Last frequency written to the drive
    pub commanded_hz: f64,
    pub auto_params: FanAutoParams,
    /// Unix milliseconds of the last auto update that ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update_ms: Option<u64>,
}

/// One reading from the external sensor reader.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Loop pressure in psi
    pub pressure_psi: f64,
    /// Basin water temperature in °F
    pub basin_temp_f: f64,
    /// Unix milliseconds when the reading was taken
    #[serde(default = "unix_millis")]
    pub captured_at_ms: u64,
}

impl SensorReading {
    pub fn new(pressure_psi: f64, basin_temp_f: f64) -> Self {
        Self {
            pressure_psi,
            basin_temp_f,
            captured_at_ms: unix_millis(),
        }
    }

    /// Age relative to `now_ms`, saturating at zero for readings from the future.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.captured_at_ms)
    }
}

/// Registry entry summary for listing drives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriveSummary {
    pub name: String,
    pub device_id: u8,
    pub description: String,
    pub healthy: bool,
    pub error_count: u32,
}
