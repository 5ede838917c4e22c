//! Drive models and their Modbus register maps
//!
//! Each supported VFD model maps to a versioned [`RegisterMap`]. Controllers
//! never hard-code register addresses; they read them from the map of the
//! model configured for the drive.

use serde::{Deserialize, Serialize};

use crate::{CoolTowerError, Result};

/// Register layout and command codes for one drive model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegisterMap {
    /// Map identifier, e.g. `galt-g540/v1`
    pub id: &'static str,
    /// Control word register
    pub control: u16,
    /// Frequency setpoint register (0.01 Hz)
    pub frequency_setpoint: u16,
    /// State word 1; state word 2 and the fault code follow contiguously
    pub state_word1: u16,
    pub state_word2: u16,
    pub fault_code: u16,
    /// Running frequency register (0.01 Hz)
    pub running_frequency: u16,
    /// Output current register (0.1 A)
    pub output_current: u16,
    /// Control word value for forward run
    pub cmd_forward: u16,
    /// Control word value for stop
    pub cmd_stop: u16,
    /// Control word value for fault reset
    pub cmd_fault_reset: u16,
}

impl RegisterMap {
    /// Number of registers covered by one batched state/fault read.
    pub fn state_block_len(&self) -> u16 {
        self.fault_code - self.state_word1 + 1
    }
}

/// GALT G540 register map, version 1
pub const GALT_G540_V1: RegisterMap = RegisterMap {
    id: "galt-g540/v1",
    control: 0x2000,
    frequency_setpoint: 0x2001,
    state_word1: 0x2100,
    state_word2: 0x2101,
    fault_code: 0x2102,
    running_frequency: 0x3000,
    output_current: 0x3004,
    cmd_forward: 0x0001,
    cmd_stop: 0x0005,
    cmd_fault_reset: 0x0007,
};

/// Supported drive models
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DriveModel {
    /// GALT G540 general purpose VFD
    #[default]
    GaltG540,
}

impl std::str::FromStr for DriveModel {
    type Err = CoolTowerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "galt-g540" | "g540" => Ok(DriveModel::GaltG540),
            _ => Err(CoolTowerError::InvalidInput(format!(
                "Unknown drive model: '{}'. Valid options: galt-g540",
                s
            ))),
        }
    }
}

impl DriveModel {
    /// Human-readable model name
    pub fn name(&self) -> &'static str {
        match self {
            DriveModel::GaltG540 => "GALT G540",
        }
    }

    pub fn register_map(&self) -> RegisterMap {
        match self {
            DriveModel::GaltG540 => GALT_G540_V1,
        }
    }

    /// Highest output frequency the model accepts, in Hz
    pub fn max_frequency_hz(&self) -> f64 {
        match self {
            DriveModel::GaltG540 => 400.0,
        }
    }

    pub fn to_model_info(self) -> ModelInfo {
        ModelInfo {
            model: self,
            name: self.name().to_string(),
            max_frequency_hz: self.max_frequency_hz(),
            register_map: self.register_map(),
        }
    }
}

/// Runtime model description, as reported by the info endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub model: DriveModel,
    pub name: String,
    pub max_frequency_hz: f64,
    pub register_map: RegisterMap,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_g540_register_map() {
        let map = DriveModel::GaltG540.register_map();
        assert_eq!(map.id, "galt-g540/v1");
        assert_eq!(map.control, 0x2000);
        assert_eq!(map.frequency_setpoint, 0x2001);
        assert_eq!(map.state_word1, 0x2100);
        assert_eq!(map.fault_code, 0x2102);
        assert_eq!(map.running_frequency, 0x3000);
        assert_eq!(map.output_current, 0x3004);
        assert_eq!(map.cmd_forward, 0x0001);
        assert_eq!(map.cmd_stop, 0x0005);
        assert_eq!(map.cmd_fault_reset, 0x0007);
    }

    #[test]
    fn test_state_block_is_contiguous() {
        let map = GALT_G540_V1;
        assert_eq!(map.state_block_len(), 3);
        assert_eq!(map.state_word2, map.state_word1 + 1);
    }

    #[test]
    fn test_model_from_str() {
        assert_eq!(DriveModel::from_str("g540").unwrap(), DriveModel::GaltG540);
        assert_eq!(
            DriveModel::from_str("GALT-G540").unwrap(),
            DriveModel::GaltG540
        );
        assert!(DriveModel::from_str("cfw300").is_err());
    }

    #[test]
    fn test_model_serde_name() {
        let json = serde_json::to_string(&DriveModel::GaltG540).unwrap();
        assert_eq!(json, r#""galt-g540""#);
    }
}
