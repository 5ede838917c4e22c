//! Configuration management module
//!
//! Loads the TOML configuration once at startup and applies command-line
//! overrides before it is shared.

mod runtime_config;

pub(crate) use runtime_config::RuntimeConfig;
