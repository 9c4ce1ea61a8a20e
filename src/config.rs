//! # Configuration Management Module
//!
//! Persistent application settings stored in platform-appropriate locations.
//! Handles loading, saving, and providing defaults for configuration options.
//!
//! ## Settings
//! - `discovery_timeout_secs`: Length of a discovery window before the scan auto-stops
//! - `adapter_index`: Which Bluetooth adapter to scan with
//! - `bluetooth_access`: Whether radio access is granted to the session controller
//! - `log_filter`: Default `env_logger` filter when `RUST_LOG` is unset
//!
//! ## Storage Location
//! - macOS: ~/Library/Application Support/wolke-monitor/config.toml
//! - Linux: ~/.config/wolke-monitor/config.toml
//! - Windows: %APPDATA%\wolke-monitor\config.toml

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub discovery_timeout_secs: u64,
    pub adapter_index: usize,
    pub bluetooth_access: bool,
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discovery_timeout_secs: 10,
            adapter_index: 0,
            bluetooth_access: true,
            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Get the path to the config file
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("wolke-monitor")
            .join("config.toml")
    }

    /// Discovery window as a `Duration`. A zero value falls back to one second.
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs.max(1))
    }

    /// Load config from `path`, writing the default there if the file is missing
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let config = toml::from_str(&contents)
                    .map_err(ConfigError::ParseFailed)?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.save_to(path)?;
                Ok(config)
            }
            Err(e) => Err(ConfigError::ReadFailed(e)),
        }
    }

    /// Save config to `path`
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(ConfigError::WriteFailed)?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(ConfigError::SerializeFailed)?;
        fs::write(path, toml_string)
            .map_err(ConfigError::WriteFailed)?;

        Ok(())
    }
}
