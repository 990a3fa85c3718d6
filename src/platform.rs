//! Platform capability detection.
//!
//! Decides whether this device has an HDMI port at all. Only then is the
//! hotplug observer started.

use crate::config::DaemonConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

/// Device-tree compatible list: NUL-separated `vendor,model` strings.
pub const DEFAULT_DEVICE_ID_PATH: &str = "/proc/device-tree/compatible";

/// A device identifier pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceMatch {
    Prefix(String),
    Exact(String),
}

impl DeviceMatch {
    pub fn matches(&self, device_id: &str) -> bool {
        match self {
            DeviceMatch::Prefix(prefix) => device_id.starts_with(prefix.as_str()),
            DeviceMatch::Exact(name) => device_id == name,
        }
    }

    pub fn pattern(&self) -> &str {
        match self {
            DeviceMatch::Prefix(p) | DeviceMatch::Exact(p) => p,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformCapability {
    device_ids: Vec<String>,
    supported: bool,
}

impl PlatformCapability {
    /// Evaluate the configured matchers against the device identifiers.
    pub fn evaluate(device_ids: Vec<String>, matchers: &[DeviceMatch]) -> Self {
        let supported = device_ids
            .iter()
            .any(|id| matchers.iter().any(|m| m.matches(id)));
        Self {
            device_ids,
            supported,
        }
    }

    /// Detect from the configured `device_id`, else from the device tree.
    pub fn detect(config: &DaemonConfig) -> Self {
        let device_ids = match &config.device_id {
            Some(id) => vec![id.clone()],
            None => read_device_ids(&config.device_id_path),
        };

        let capability = Self::evaluate(device_ids, &config.hdmi_capable_devices);
        info!(
            "Device {:?} HDMI capable: {}",
            capability.device_ids, capability.supported
        );
        capability
    }

    pub fn supports_hdmi(&self) -> bool {
        self.supported
    }
}

fn read_device_ids(path: &Path) -> Vec<String> {
    match std::fs::read(path) {
        Ok(bytes) => parse_compatible(&bytes),
        Err(e) => {
            warn!("Cannot read device identity at {:?}: {}", path, e);
            Vec::new()
        }
    }
}

/// Split a compatible list and strip vendor prefixes
/// (`qcom,msm8660-surf` becomes `msm8660-surf`).
pub fn parse_compatible(bytes: &[u8]) -> Vec<String> {
    let ids: Vec<String> = bytes
        .split(|&b| b == 0 || b == b'\n')
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let entry = String::from_utf8_lossy(entry);
            match entry.split_once(',') {
                Some((_, model)) => model.trim().to_string(),
                None => entry.trim().to_string(),
            }
        })
        .filter(|id| !id.is_empty())
        .collect();
    debug!("Device identifiers: {:?}", ids);
    ids
}
