//! Cross-field validation of the static configuration

use std::collections::HashSet;

use super::StaticConfig;
use crate::protocol::{MAX_DEVICE_ID, MIN_DEVICE_ID};

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// Two drives share a name
    #[error("Drive name '{0}' is used more than once")]
    DuplicateDriveName(String),

    /// Two drives share a bus address
    #[error("Device ID {device_id} is used by both '{first}' and '{second}'")]
    DuplicateDeviceId {
        device_id: u8,
        first: String,
        second: String,
    },

    /// Address outside the multi-drop range
    #[error("Drive '{name}' has device ID {device_id} (must be {min}-{max})", min = MIN_DEVICE_ID, max = MAX_DEVICE_ID)]
    DeviceIdOutOfRange { name: String, device_id: u8 },

    /// A controller refers to a drive that is not configured
    #[error("{section} refers to unknown drive '{drive}'")]
    UnknownDrive { section: &'static str, drive: String },

    /// Primary and backup pump are the same drive
    #[error("Failover primary and backup must be different drives, both are '{0}'")]
    SamePumpTwice(String),

    /// A numeric setting is out of range
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl StaticConfig {
    /// Validate the configuration, collecting every problem found.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        let mut names = HashSet::new();
        let mut ids: Vec<(u8, &str)> = Vec::new();
        for drive in &self.drives {
            if !names.insert(drive.name.as_str()) {
                errors.push(ValidationError::DuplicateDriveName(drive.name.clone()));
            }
            if !(MIN_DEVICE_ID..=MAX_DEVICE_ID).contains(&drive.device_id) {
                errors.push(ValidationError::DeviceIdOutOfRange {
                    name: drive.name.clone(),
                    device_id: drive.device_id,
                });
            }
            if let Some((_, first)) = ids.iter().find(|(id, _)| *id == drive.device_id) {
                errors.push(ValidationError::DuplicateDeviceId {
                    device_id: drive.device_id,
                    first: first.to_string(),
                    second: drive.name.clone(),
                });
            }
            ids.push((drive.device_id, &drive.name));
            if !drive.max_hz.is_finite()
                || drive.max_hz <= 0.0
                || drive.max_hz > drive.model.max_frequency_hz()
            {
                errors.push(ValidationError::InvalidValue {
                    field: "drives.max_hz",
                    reason: format!(
                        "'{}' has {} Hz, must be in (0, {}]",
                        drive.name,
                        drive.max_hz,
                        drive.model.max_frequency_hz()
                    ),
                });
            }
        }

        if self.drive(&self.fan.drive).is_none() {
            errors.push(ValidationError::UnknownDrive {
                section: "fan",
                drive: self.fan.drive.clone(),
            });
        }
        if let Err(e) = self.fan.auto.validate() {
            errors.push(ValidationError::InvalidValue {
                field: "fan",
                reason: e.to_string(),
            });
        }

        if self.failover.enabled {
            for pump in [&self.failover.primary, &self.failover.backup] {
                if self.drive(pump).is_none() {
                    errors.push(ValidationError::UnknownDrive {
                        section: "failover",
                        drive: pump.clone(),
                    });
                }
            }
            if self.failover.primary == self.failover.backup {
                errors.push(ValidationError::SamePumpTwice(
                    self.failover.primary.clone(),
                ));
            }
            if self.failover.max_errors == 0 {
                errors.push(ValidationError::InvalidValue {
                    field: "failover.max_errors",
                    reason: "must be at least 1".to_string(),
                });
            }
        }

        let pump = &self.pump_control;
        if pump.enabled && !self.failover.enabled {
            errors.push(ValidationError::InvalidValue {
                field: "pump_control.enabled",
                reason: "pressure control drives the pumps through failover, which is disabled"
                    .to_string(),
            });
        }
        if pump.min_hz < 0.0 || pump.min_hz > pump.max_hz {
            errors.push(ValidationError::InvalidValue {
                field: "pump_control",
                reason: format!(
                    "range must satisfy 0 <= min_hz <= max_hz, got {}..{}",
                    pump.min_hz, pump.max_hz
                ),
            });
        }

        if !matches!(self.serial.data_bits, 5..=8) {
            errors.push(ValidationError::InvalidValue {
                field: "serial.data_bits",
                reason: format!("must be 5-8, got {}", self.serial.data_bits),
            });
        }
        if !matches!(self.serial.stop_bits, 1 | 2) {
            errors.push(ValidationError::InvalidValue {
                field: "serial.stop_bits",
                reason: format!("must be 1 or 2, got {}", self.serial.stop_bits),
            });
        }
        if self.serial.baud_rate == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "serial.baud_rate",
                reason: "must be positive".to_string(),
            });
        }
        if self.polling.control_interval_ms == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "polling.control_interval_ms",
                reason: "must be positive".to_string(),
            });
        }
        if self.polling.status_interval_secs == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "polling.status_interval_secs",
                reason: "must be positive".to_string(),
            });
        }

        errors
    }
}
