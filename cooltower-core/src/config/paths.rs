//! Default path resolution for configuration files
//!
//! Uses XDG Base Directory specification when available, with sensible fallbacks.

use std::path::PathBuf;

/// Environment variable overriding the configuration file location
pub const CONFIG_ENV_VAR: &str = "COOLTOWER_CONFIG";

/// Returns the default path for the static configuration file.
///
/// Uses XDG config directory if available:
/// - Linux/macOS: `~/.config/cooltower/config.toml`
/// - Fallback: `/etc/cooltower/config.toml`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("/etc"))
        .join("cooltower")
        .join("config.toml")
}

/// Resolve the configuration path: explicit flag, then environment, then default.
pub fn resolve_config_path(cli: Option<PathBuf>) -> PathBuf {
    cli.or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from))
        .unwrap_or_else(default_config_path)
}

/// Default well-known lock file shared by every process on the bus.
pub fn default_lock_path() -> PathBuf {
    std::env::temp_dir().join("cooltower-rtu.lock")
}
