//! API models for the supervisor REST API
//!
//! Request and response bodies shared by the daemon and its clients.

use crate::config::Parity;
use crate::types::{
    DriveStatus, DriveSummary, FailoverStatus, FanMode, FanStatus, SensorReading,
};
use crate::ModelInfo;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Generic API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum ApiResponse<T> {
    #[serde(rename = "success")]
    Success { data: T },
    #[serde(rename = "error")]
    Error { error: String },
}

impl<T> ApiResponse<T> {
    /// Create a successful response
    pub fn success(data: T) -> Self {
        Self::Success { data }
    }

    /// Create an error response
    pub fn error(error: String) -> Self {
        Self::Error { error }
    }
}

/// Liveness response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime: u64,
}

/// Serial line settings as reported by the info endpoint
#[derive(Debug, Clone, Serialize)]
pub struct SerialInfo {
    pub port: String,
    pub baud_rate: u32,
    pub parity: Parity,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub process_lock: bool,
}

/// One configured drive as reported by the info endpoint
#[derive(Debug, Clone, Serialize)]
pub struct DriveInfo {
    pub name: String,
    pub device_id: u8,
    pub description: String,
    pub max_hz: f64,
    pub model: ModelInfo,
}

/// Server information response
#[derive(Debug, Clone, Serialize)]
pub struct InfoResponse {
    /// Server version
    pub version: String,
    /// Software information
    pub software: String,
    /// True when the bus is simulated
    pub mock: bool,
    /// Server uptime in seconds
    pub uptime: u64,
    pub serial: SerialInfo,
    pub drives: Vec<DriveInfo>,
}

/// Drive list response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveListResponse {
    pub drives: Vec<DriveSummary>,
}

/// Live status of one drive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveStatusResponse {
    pub name: String,
    pub status: DriveStatus,
}

/// Outcome of a command sent to a drive or controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    /// Drive or controller the command targeted
    pub target: String,
    pub command: String,
    /// Frequency written, for frequency commands
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hz: Option<f64>,
}

/// Query string for frequency commands (`?value=HZ`)
#[derive(Debug, Clone, Deserialize)]
pub struct FrequencyQuery {
    pub value: f64,
}

/// Query string for drive status reads (`?live=true`)
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct StatusQuery {
    /// Refuse cached or missing data instead of degrading
    #[serde(default)]
    pub live: bool,
}

/// Fan mode change request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanModeRequest {
    pub mode: FanMode,
}

/// Manual fan setpoint request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanSetpointRequest {
    pub hz: f64,
}

/// Sensor reading pushed by the external reader
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorUpdateRequest {
    pub pressure_psi: f64,
    pub basin_temp_f: f64,
}

/// Full supervisor snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatusResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensors: Option<SensorReading>,
    /// Last polled status of each drive
    pub drives: BTreeMap<String, DriveStatus>,
    /// Absent when failover is disabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pump: Option<FailoverStatus>,
    pub fan: FanStatus,
    /// Last frequency written by the pressure law
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pump_command_hz: Option<f64>,
    pub timestamp_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_response_success() {
        let response = ApiResponse::success(42u32);
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(json, r#"{"status":"success","data":42}"#);
    }

    #[test]
    fn test_api_response_error() {
        let response: ApiResponse<()> = ApiResponse::error("Bus busy".to_string());
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(json, r#"{"status":"error","error":"Bus busy"}"#);
    }

    #[test]
    fn test_fan_mode_request() {
        let request: FanModeRequest = serde_json::from_str(r#"{"mode":"auto"}"#).unwrap();
        assert_eq!(request.mode, FanMode::Auto);
        assert!(serde_json::from_str::<FanModeRequest>(r#"{"mode":"turbo"}"#).is_err());
    }

    #[test]
    fn test_command_response_omits_missing_hz() {
        let response = CommandResponse {
            target: "fan".to_string(),
            command: "start".to_string(),
            hz: None,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("hz"));
    }
}
