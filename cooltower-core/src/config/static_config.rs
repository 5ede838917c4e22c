//! Static configuration loaded once at startup
//!
//! This configuration is read-only after the daemon starts.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::paths::default_lock_path;
use crate::{DriveModel, FanAutoParams};

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server hostname
    pub hostname: String,
    /// Server port
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            port: 8000,
        }
    }
}

/// Serial line parity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

/// Serial bus and transaction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Serial device path
    pub port: String,
    pub baud_rate: u32,
    pub parity: Parity,
    pub data_bits: u8,
    pub stop_bits: u8,
    /// Read window for one response
    pub response_timeout_ms: u64,
    /// Pause between writing a request and reading the response
    pub settle_ms: u64,
    /// Additional attempts after the first failed one
    pub retries: u32,
    /// Delay between attempts
    pub retry_backoff_ms: u64,
    /// Maximum wait for the in-process bus lock
    pub bus_lock_timeout_ms: u64,
    /// Also take an OS-level lock shared with other processes
    pub process_lock: bool,
    /// Lock file for the cross-process lock
    pub lock_file: PathBuf,
    /// Maximum wait for the cross-process lock
    pub process_lock_timeout_ms: u64,
    /// Log every frame sent and received at debug level
    pub debug_frames: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            parity: Parity::None,
            data_bits: 8,
            stop_bits: 1,
            response_timeout_ms: 500,
            settle_ms: 50,
            retries: 2,
            retry_backoff_ms: 100,
            bus_lock_timeout_ms: 2000,
            process_lock: true,
            lock_file: default_lock_path(),
            process_lock_timeout_ms: 5000,
            debug_frames: false,
        }
    }
}

/// One VFD on the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriveConfig {
    /// Unique name used by the registry and the API
    pub name: String,
    /// Modbus slave address (1-247)
    pub device_id: u8,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub model: DriveModel,
    /// Upper bound applied to direct frequency commands
    #[serde(default = "default_drive_max_hz")]
    pub max_hz: f64,
}

fn default_drive_max_hz() -> f64 {
    60.0
}

impl DriveConfig {
    pub fn new(name: &str, device_id: u8, description: &str) -> Self {
        Self {
            name: name.to_string(),
            device_id,
            description: description.to_string(),
            model: DriveModel::default(),
            max_hz: default_drive_max_hz(),
        }
    }
}

fn default_drives() -> Vec<DriveConfig> {
    vec![
        DriveConfig::new("fan", 3, "Cooling Tower Fan"),
        DriveConfig::new("pump_primary", 1, "Primary Pump"),
        DriveConfig::new("pump_backup", 2, "Backup Pump"),
    ]
}

/// Cached status settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusCacheConfig {
    /// A cached status younger than this is served when a live read fails
    pub staleness_secs: u64,
}

impl Default for StatusCacheConfig {
    fn default() -> Self {
        Self { staleness_secs: 30 }
    }
}

/// Pump failover settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverConfig {
    pub enabled: bool,
    /// Drive name of the primary pump
    pub primary: String,
    /// Drive name of the backup pump
    pub backup: String,
    /// A drive is unhealthy once its error counter reaches this value
    pub max_errors: u32,
    pub check_interval_secs: u64,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            primary: "pump_primary".to_string(),
            backup: "pump_backup".to_string(),
            max_errors: 3,
            check_interval_secs: 5,
        }
    }
}

/// Fan controller settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanConfig {
    /// Drive name of the fan
    #[serde(default = "default_fan_drive")]
    pub drive: String,
    /// Start in auto mode instead of manual
    #[serde(default)]
    pub start_in_auto: bool,
    #[serde(flatten)]
    pub auto: FanAutoParams,
}

fn default_fan_drive() -> String {
    "fan".to_string()
}

impl Default for FanConfig {
    fn default() -> Self {
        Self {
            drive: default_fan_drive(),
            start_in_auto: false,
            auto: FanAutoParams::default(),
        }
    }
}

/// Pressure-based pump speed law
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PumpControlConfig {
    pub enabled: bool,
    pub target_pressure_psi: f64,
    /// Frequency at zero pressure error
    pub base_hz: f64,
    /// Hz per psi of pressure error
    pub kp: f64,
    pub min_hz: f64,
    pub max_hz: f64,
    /// Changes smaller than this are not written
    pub deadband_hz: f64,
}

impl Default for PumpControlConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            target_pressure_psi: 15.0,
            base_hz: 30.0,
            kp: 1.0,
            min_hz: 20.0,
            max_hz: 60.0,
            deadband_hz: 0.1,
        }
    }
}

/// Task scheduling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Control loop tick
    pub control_interval_ms: u64,
    /// Drive status poll interval
    pub status_interval_secs: u64,
    /// Sensor readings older than this are ignored by the control loop
    pub sensor_stale_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            control_interval_ms: 1000,
            status_interval_secs: 10,
            sensor_stale_secs: 10,
        }
    }
}

/// Shutdown behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Stop every registered drive on shutdown
    pub stop_drives: bool,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { stop_drives: true }
    }
}

/// Static configuration for the supervisor daemon.
///
/// Loaded once at startup and immutable during runtime.
/// Located at `~/.config/cooltower/config.toml` by default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub status_cache: StatusCacheConfig,
    #[serde(default)]
    pub failover: FailoverConfig,
    #[serde(default)]
    pub fan: FanConfig,
    #[serde(default)]
    pub pump_control: PumpControlConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    /// Drives on the bus
    #[serde(default = "default_drives")]
    pub drives: Vec<DriveConfig>,
}

impl Default for StaticConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            serial: SerialConfig::default(),
            status_cache: StatusCacheConfig::default(),
            failover: FailoverConfig::default(),
            fan: FanConfig::default(),
            pump_control: PumpControlConfig::default(),
            polling: PollingConfig::default(),
            shutdown: ShutdownConfig::default(),
            drives: default_drives(),
        }
    }
}

impl StaticConfig {
    /// Parse StaticConfig from TOML string.
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Serialize StaticConfig to TOML string.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Look up a drive by name.
    pub fn drive(&self, name: &str) -> Option<&DriveConfig> {
        self.drives.iter().find(|d| d.name == name)
    }
}
