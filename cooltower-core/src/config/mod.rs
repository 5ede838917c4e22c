//! Configuration types for the supervisor
//!
//! A single TOML file ([`StaticConfig`]) describes the serial bus, the drives
//! on it, and the controller parameters. It is loaded once at startup and
//! checked with [`StaticConfig::validate`].

mod paths;
mod static_config;
mod validation;

pub use paths::{default_config_path, default_lock_path, resolve_config_path, CONFIG_ENV_VAR};
pub use static_config::{
    DriveConfig, FailoverConfig, FanConfig, Parity, PollingConfig, PumpControlConfig,
    SerialConfig, ServerConfig, ShutdownConfig, StaticConfig, StatusCacheConfig,
};
pub use validation::ValidationError;
