//! Modbus RTU protocol vocabulary
//!
//! Function and exception codes shared by the frame codec, the error
//! taxonomy, and the API layer. Framing itself lives in `cooltower-hardware`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lowest assignable slave address on a multi-drop bus
pub const MIN_DEVICE_ID: u8 = 1;

/// Highest assignable slave address on a multi-drop bus
pub const MAX_DEVICE_ID: u8 = 247;

/// High bit of the function code byte, set by a device to flag an exception
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Modbus function codes used by the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum FunctionCode {
    /// Read holding registers (0x03)
    ReadHoldingRegisters = 0x03,
    /// Write single register (0x06)
    WriteSingleRegister = 0x06,
}

impl FunctionCode {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Map a raw function byte back to a known code (exception bit stripped).
    pub fn from_code(code: u8) -> Option<Self> {
        match code & !EXCEPTION_FLAG {
            0x03 => Some(FunctionCode::ReadHoldingRegisters),
            0x06 => Some(FunctionCode::WriteSingleRegister),
            _ => None,
        }
    }
}

/// Modbus exception codes.
///
/// Unknown codes are preserved in `Other` rather than dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExceptionCode {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    DeviceFailure,
    Acknowledge,
    DeviceBusy,
    MemoryParityError,
    GatewayPathUnavailable,
    GatewayTargetFailed,
    Other(u8),
}

impl ExceptionCode {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => ExceptionCode::IllegalFunction,
            0x02 => ExceptionCode::IllegalDataAddress,
            0x03 => ExceptionCode::IllegalDataValue,
            0x04 => ExceptionCode::DeviceFailure,
            0x05 => ExceptionCode::Acknowledge,
            0x06 => ExceptionCode::DeviceBusy,
            0x08 => ExceptionCode::MemoryParityError,
            0x0A => ExceptionCode::GatewayPathUnavailable,
            0x0B => ExceptionCode::GatewayTargetFailed,
            other => ExceptionCode::Other(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            ExceptionCode::IllegalFunction => 0x01,
            ExceptionCode::IllegalDataAddress => 0x02,
            ExceptionCode::IllegalDataValue => 0x03,
            ExceptionCode::DeviceFailure => 0x04,
            ExceptionCode::Acknowledge => 0x05,
            ExceptionCode::DeviceBusy => 0x06,
            ExceptionCode::MemoryParityError => 0x08,
            ExceptionCode::GatewayPathUnavailable => 0x0A,
            ExceptionCode::GatewayTargetFailed => 0x0B,
            ExceptionCode::Other(code) => code,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ExceptionCode::IllegalFunction => "illegal function",
            ExceptionCode::IllegalDataAddress => "illegal data address",
            ExceptionCode::IllegalDataValue => "illegal data value",
            ExceptionCode::DeviceFailure => "device failure",
            ExceptionCode::Acknowledge => "acknowledge",
            ExceptionCode::DeviceBusy => "device busy",
            ExceptionCode::MemoryParityError => "memory parity error",
            ExceptionCode::GatewayPathUnavailable => "gateway path unavailable",
            ExceptionCode::GatewayTargetFailed => "gateway target failed to respond",
            ExceptionCode::Other(_) => "unknown exception",
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X} ({})", self.code(), self.name())
    }
}

/// Validate a slave address for multi-drop addressing.
pub fn validate_device_id(device_id: u8) -> crate::Result<()> {
    if !(MIN_DEVICE_ID..=MAX_DEVICE_ID).contains(&device_id) {
        return Err(crate::CoolTowerError::InvalidInput(format!(
            "Device ID must be {}-{}, got {}",
            MIN_DEVICE_ID, MAX_DEVICE_ID, device_id
        )));
    }
    Ok(())
}
