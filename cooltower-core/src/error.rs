//! Error types for the cooling tower supervisor

use thiserror::Error;

/// Core error type for supervisor operations
#[derive(Error, Debug)]
pub enum CoolTowerError {
    /// Cannot open, write, or read the serial port
    #[error("Transport error: {0}")]
    Transport(String),

    /// No response, or an incomplete one, inside the read window
    #[error("Timed out: {0}")]
    Timeout(String),

    /// CRC mismatch, truncated frame, or a response that does not match the request
    #[error("Frame error: {0}")]
    Frame(String),

    /// The device answered with a Modbus exception response
    #[error("Device {device_id} returned exception {code}")]
    ProtocolException {
        device_id: u8,
        code: crate::ExceptionCode,
    },

    /// Bus arbiter acquisition timed out
    #[error("Bus busy: lock not acquired within {waited_ms} ms")]
    BusBusy { waited_ms: u64 },

    /// Status was served from the cache because the live read failed
    #[error("Stale data for drive '{drive}' ({age_secs:.1}s old)")]
    StaleData { drive: String, age_secs: f64 },

    /// No live data and no fresh cache
    #[error("Communication lost with drive '{0}'")]
    CommLost(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input or arguments
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Drive not registered
    #[error("Drive not found: {0}")]
    DriveNotFound(String),

    /// A drive with the same name is already registered
    #[error("Duplicate drive: {0}")]
    DuplicateDrive(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A command could not be carried out: not acknowledged, or the
    /// controller is stopped or disabled
    #[error("Unavailable: {0}")]
    Unavailable(String),
}

impl CoolTowerError {
    /// Whether this error is a drive-level communication failure.
    ///
    /// These are absorbed by the drive controller into its error counter.
    /// `BusBusy` is deliberately excluded: it is a property of the shared
    /// medium, not of any one drive.
    pub fn is_communication_failure(&self) -> bool {
        matches!(
            self,
            CoolTowerError::Transport(_)
                | CoolTowerError::Timeout(_)
                | CoolTowerError::Frame(_)
                | CoolTowerError::ProtocolException { .. }
        )
    }

    /// Whether a retry of the same request could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoolTowerError::Timeout(_) | CoolTowerError::Frame(_) | CoolTowerError::Transport(_)
        )
    }
}

/// Result type alias for supervisor operations
pub type Result<T> = std::result::Result<T, CoolTowerError>;

impl From<serde_json::Error> for CoolTowerError {
    fn from(err: serde_json::Error) -> Self {
        CoolTowerError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for CoolTowerError {
    fn from(err: toml::de::Error) -> Self {
        CoolTowerError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: CoolTowerError = json_err.into();

        match err {
            CoolTowerError::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_toml_error_conversion() {
        let toml_err = toml::from_str::<toml::Value>("= nope").unwrap_err();
        let err: CoolTowerError = toml_err.into();
        assert!(matches!(err, CoolTowerError::Config(_)));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: CoolTowerError = io_err.into();

        match err {
            CoolTowerError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_error_display() {
        let err = CoolTowerError::ProtocolException {
            device_id: 3,
            code: crate::ExceptionCode::IllegalDataAddress,
        };
        assert_eq!(
            format!("{}", err),
            "Device 3 returned exception 0x02 (illegal data address)"
        );

        let err = CoolTowerError::BusBusy { waited_ms: 2000 };
        assert_eq!(
            format!("{}", err),
            "Bus busy: lock not acquired within 2000 ms"
        );

        let err = CoolTowerError::CommLost("fan".to_string());
        assert_eq!(format!("{}", err), "Communication lost with drive 'fan'");

        let err = CoolTowerError::StaleData {
            drive: "pump_primary".to_string(),
            age_secs: 4.3,
        };
        assert_eq!(
            format!("{}", err),
            "Stale data for drive 'pump_primary' (4.3s old)"
        );
    }

    #[test]
    fn test_communication_failure_classification() {
        assert!(CoolTowerError::Timeout("read".into()).is_communication_failure());
        assert!(CoolTowerError::Frame("crc".into()).is_communication_failure());
        assert!(CoolTowerError::Transport("gone".into()).is_communication_failure());
        assert!(CoolTowerError::ProtocolException {
            device_id: 1,
            code: crate::ExceptionCode::DeviceFailure,
        }
        .is_communication_failure());
        assert!(!CoolTowerError::BusBusy { waited_ms: 10 }.is_communication_failure());
        assert!(!CoolTowerError::InvalidInput("x".into()).is_communication_failure());
    }

    #[test]
    fn test_exception_is_not_retryable() {
        let err = CoolTowerError::ProtocolException {
            device_id: 1,
            code: crate::ExceptionCode::IllegalFunction,
        };
        assert!(!err.is_retryable());
        assert!(!CoolTowerError::BusBusy { waited_ms: 1 }.is_retryable());
        assert!(CoolTowerError::Timeout("t".into()).is_retryable());
    }
}
