//! CoolTower Core Library
//!
//! Shared types, register maps, and configuration for the cooling tower
//! supervisor. Used by the hardware, control, and daemon crates.

pub mod api;
pub mod config;
pub mod drive_model;
pub mod error;
pub mod protocol;
pub mod types;

// Re-export commonly used types
pub use config::{default_config_path, DriveConfig, StaticConfig, ValidationError};
pub use drive_model::*;
pub use error::*;
pub use protocol::{ExceptionCode, FunctionCode};
pub use types::*;
