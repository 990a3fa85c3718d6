//! Sink probing through sysfs.
//!
//! Reads the HDMI cable state attribute and the list of mode codes parsed
//! from the sink's EDID by the display driver.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default cable state attribute ("1" while a sink is attached).
pub const DEFAULT_STATE_PATH: &str = "/sys/kernel/hdmi_kset/hdmi_kobj/hdmi_state_obj";

/// Default attribute listing the sink's video identification codes.
pub const DEFAULT_MODES_PATH: &str = "/sys/class/graphics/fb1/edid_modes";

#[derive(Debug, Clone)]
pub struct SinkProbe {
    state_path: PathBuf,
    modes_path: PathBuf,
}

impl SinkProbe {
    pub fn new(state_path: impl Into<PathBuf>, modes_path: impl Into<PathBuf>) -> Self {
        Self {
            state_path: state_path.into(),
            modes_path: modes_path.into(),
        }
    }

    /// Whether the driver currently reports a sink. A missing or unreadable
    /// attribute reads as absent.
    pub fn cable_present(&self) -> bool {
        match std::fs::read_to_string(&self.state_path) {
            Ok(contents) => parse_cable_state(&contents),
            Err(e) => {
                debug!("Cannot read HDMI state at {:?}: {}", self.state_path, e);
                false
            }
        }
    }

    /// Raw mode codes as reported by the driver, in reporting order.
    pub fn raw_modes(&self) -> Vec<u32> {
        match std::fs::read_to_string(&self.modes_path) {
            Ok(contents) => parse_mode_list(&contents),
            Err(e) => {
                warn!("Cannot read sink modes at {:?}: {}", self.modes_path, e);
                Vec::new()
            }
        }
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }
}

/// The state attribute starts with '1' when a sink is attached.
pub fn parse_cable_state(contents: &str) -> bool {
    contents.trim_start().starts_with('1')
}

/// Parse a whitespace or comma separated list of mode codes. Tokens that
/// are not numbers are skipped.
pub fn parse_mode_list(contents: &str) -> Vec<u32> {
    contents
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|token| !token.is_empty())
        .filter_map(|token| match token.parse::<u32>() {
            Ok(code) => Some(code),
            Err(_) => {
                warn!("Skipping malformed mode token '{}'", token);
                None
            }
        })
        .collect()
}
