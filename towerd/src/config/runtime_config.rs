//! Runtime configuration
//!
//! Wraps the static TOML configuration with the path it came from and the
//! command-line overrides applied at startup.

use cooltower_core::{config::StaticConfig, CoolTowerError, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info};

/// Configuration shared read-only by every task once the daemon is running.
#[derive(Debug, Clone)]
pub(crate) struct RuntimeConfig {
    static_config: StaticConfig,
    path: PathBuf,
}

impl RuntimeConfig {
    /// Load configuration from disk.
    ///
    /// If the config file doesn't exist, it is created with defaults.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let config = RuntimeConfig::load(Path::new("/etc/cooltower/config.toml")).await?;
    /// config.validate()?;
    /// ```
    pub async fn load(config_path: &Path) -> Result<Self> {
        info!("Loading configuration from: {}", config_path.display());
        let static_config = Self::load_static_config(config_path).await?;
        Ok(Self {
            static_config,
            path: config_path.to_path_buf(),
        })
    }

    /// Wrap an in-memory configuration.
    pub fn from_static(static_config: StaticConfig, path: impl Into<PathBuf>) -> Self {
        Self {
            static_config,
            path: path.into(),
        }
    }

    /// Load static config from TOML file, creating with defaults if missing.
    async fn load_static_config(path: &Path) -> Result<StaticConfig> {
        if !path.exists() {
            info!(
                "Config not found at {}. Creating with defaults.",
                path.display()
            );

            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    CoolTowerError::Config(format!(
                        "Failed to create config directory '{}': {}",
                        parent.display(),
                        e
                    ))
                })?;
            }

            let config = StaticConfig::default();
            let toml_str = config.to_toml().map_err(|e| {
                CoolTowerError::Config(format!("Failed to serialize config: {}", e))
            })?;

            fs::write(path, &toml_str).await.map_err(|e| {
                CoolTowerError::Config(format!("Failed to write config file: {}", e))
            })?;

            return Ok(config);
        }

        let content = fs::read_to_string(path)
            .await
            .map_err(|e| CoolTowerError::Config(format!("Failed to read config file: {}", e)))?;

        StaticConfig::from_toml(&content)
            .map_err(|e| CoolTowerError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn static_config(&self) -> &StaticConfig {
        &self.static_config
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `--device` and `--port`.
    pub fn apply_overrides(&mut self, device: Option<String>, port: Option<u16>) {
        if let Some(device) = device {
            info!("Serial port overridden: {}", device);
            self.static_config.serial.port = device;
        }
        if let Some(port) = port {
            self.static_config.server.port = port;
        }
    }

    /// Validate the configuration, logging every problem found.
    pub fn validate(&self) -> Result<()> {
        let errors = self.static_config.validate();
        if errors.is_empty() {
            return Ok(());
        }
        for e in &errors {
            error!("Config: {}", e);
        }
        Err(CoolTowerError::Config(format!(
            "{} problem(s) in {}",
            errors.len(),
            self.path.display()
        )))
    }
}
