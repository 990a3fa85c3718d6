//! Configuration module for daemon settings.
//!
//! This module handles loading and validating the daemon configuration.
//! Every field has a default, so a missing file or a partial file both work.

use crate::error::ConfigError;
use crate::hardware::DEFAULT_LINK_COMMAND;
use crate::hotplug::{DEFAULT_POLL_INTERVAL_MS, DEFAULT_RETRY_INTERVAL_SECS};
use crate::ipc_server::DEFAULT_SOCKET_PATH;
use crate::platform::{DeviceMatch, DEFAULT_DEVICE_ID_PATH};
use crate::sink_probe::{DEFAULT_MODES_PATH, DEFAULT_STATE_PATH};
use crate::uevent::DEFAULT_UEVENT_FILTER;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "hdmi-link";

/// Daemon configuration.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    pub socket_path: PathBuf,
    pub preferences_path: PathBuf,
    /// Program invoked to switch the physical output.
    pub hardware_command: String,
    /// Overrides device detection when set.
    pub device_id: Option<String>,
    pub device_id_path: PathBuf,
    pub hdmi_capable_devices: Vec<DeviceMatch>,
    pub uevent_filter: String,
    pub state_path: PathBuf,
    pub modes_path: PathBuf,
    pub hotplug_poll_ms: u64,
    pub hotplug_retry_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            preferences_path: default_preferences_path(),
            hardware_command: DEFAULT_LINK_COMMAND.to_string(),
            device_id: None,
            device_id_path: PathBuf::from(DEFAULT_DEVICE_ID_PATH),
            hdmi_capable_devices: vec![
                DeviceMatch::Prefix("msm7630".to_string()),
                DeviceMatch::Prefix("msm8660".to_string()),
                DeviceMatch::Exact("triumph".to_string()),
            ],
            uevent_filter: DEFAULT_UEVENT_FILTER.to_string(),
            state_path: PathBuf::from(DEFAULT_STATE_PATH),
            modes_path: PathBuf::from(DEFAULT_MODES_PATH),
            hotplug_poll_ms: DEFAULT_POLL_INTERVAL_MS,
            hotplug_retry_secs: DEFAULT_RETRY_INTERVAL_SECS,
        }
    }
}

impl DaemonConfig {
    /// Validate configuration values.
    /// Returns Ok(()) if valid, Err with descriptive message if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hardware_command.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "hardware_command must not be empty".to_string(),
            ));
        }

        if self.uevent_filter.is_empty() {
            return Err(ConfigError::ValidationError(
                "uevent_filter must not be empty".to_string(),
            ));
        }

        if !(10..=60_000).contains(&self.hotplug_poll_ms) {
            return Err(ConfigError::ValidationError(format!(
                "hotplug_poll_ms ({}) must be between 10 and 60000",
                self.hotplug_poll_ms
            )));
        }

        if self.hotplug_retry_secs == 0 {
            return Err(ConfigError::ValidationError(
                "hotplug_retry_secs must be at least 1".to_string(),
            ));
        }

        if let Some(matcher) = self.hdmi_capable_devices.iter().find(|m| m.pattern().is_empty()) {
            return Err(ConfigError::ValidationError(format!(
                "empty device pattern in hdmi_capable_devices: {:?}",
                matcher
            )));
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.hotplug_poll_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.hotplug_retry_secs)
    }
}

fn default_preferences_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
        .join("preferences.json")
}

/// Configuration manager with file I/O.
pub struct ConfigManager {
    config: DaemonConfig,
    path: PathBuf,
}

impl ConfigManager {
    /// Default config location: `<config_dir>/hdmi-link/config.json`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/etc"))
            .join(APP_DIR)
            .join("config.json")
    }

    /// Load configuration from file or use defaults.
    /// If the file doesn't exist, returns a manager with default config.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        let config = if path.exists() {
            let contents = fs::read_to_string(path).map_err(|e| {
                ConfigError::ParseError(format!("Failed to read config file: {}", e))
            })?;

            let config: DaemonConfig = serde_json::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(format!("Invalid JSON: {}", e)))?;

            config.validate()?;
            config
        } else {
            DaemonConfig::default()
        };

        Ok(Self {
            config,
            path: path.to_path_buf(),
        })
    }

    /// Get current configuration.
    pub fn get(&self) -> DaemonConfig {
        self.config.clone()
    }

    /// Get the config file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
