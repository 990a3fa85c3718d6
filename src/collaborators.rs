//! Contracts of the services the link controller drives.
//!
//! The controller only ever talks to these traits; concrete implementations
//! live in `hardware`, `notifier`, `event_bus` and `preferences`.

use crate::error::{HardwareError, PreferenceError};
use crate::mode_catalog::{self, DisplayMode};
use serde::Serialize;

/// Physical output control.
pub trait HardwareLink: Send + Sync {
    fn enable(&self, mode: DisplayMode) -> Result<(), HardwareError>;
    fn disable(&self) -> Result<(), HardwareError>;
}

/// User-visible notification channel. `cancel` is idempotent.
pub trait NotificationSink: Send + Sync {
    fn show(&self, notice: &Notice);
    fn cancel(&self, id: u32);
}

/// Fire-and-forget event fan-out.
pub trait EventBus: Send + Sync {
    fn publish(&self, event: LinkEvent);
}

/// Persisted key/value preference storage.
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, PreferenceError>;
    fn put(&self, key: &str, value: &str) -> Result<(), PreferenceError>;
}

/// Events published to downstream consumers (audio routing, settings UI).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event")]
pub enum LinkEvent {
    #[serde(rename = "HDMI_CABLE_CONNECTED")]
    CableConnected,
    #[serde(rename = "HDMI_CABLE_DISCONNECTED")]
    CableDisconnected,
    /// Link is live; carries the VIC codes of the reported modes in order.
    #[serde(rename = "HDMI_CONNECTED")]
    LinkOn {
        #[serde(rename = "EDID")]
        modes: Vec<u32>,
    },
    #[serde(rename = "HDMI_DISCONNECTED")]
    LinkOff,
    #[serde(rename = "HDMI_ONLINE")]
    Online,
}

impl LinkEvent {
    pub fn link_on(modes: &[DisplayMode]) -> Self {
        LinkEvent::LinkOn {
            modes: mode_catalog::to_vics(modes),
        }
    }

    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            LinkEvent::CableConnected => "HDMI_CABLE_CONNECTED",
            LinkEvent::CableDisconnected => "HDMI_CABLE_DISCONNECTED",
            LinkEvent::LinkOn { .. } => "HDMI_CONNECTED",
            LinkEvent::LinkOff => "HDMI_DISCONNECTED",
            LinkEvent::Online => "HDMI_ONLINE",
        }
    }
}

/// Identifier of the "cable connected" notice.
pub const HDMI_NOTICE_ID: u32 = 0x0108_00b1;

/// A user-visible notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub id: u32,
    pub title: String,
    pub body: String,
    /// Label of the action that opens the output settings.
    pub action: String,
}

impl Notice {
    pub fn cable_connected() -> Self {
        Self {
            id: HDMI_NOTICE_ID,
            title: "HDMI CONNECTED".to_string(),
            body: "HDMI cable is now connected".to_string(),
            action: "Open HDMI settings".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let event = LinkEvent::link_on(&[
            DisplayMode::Sd480i60,
            DisplayMode::Hd1080p60,
            DisplayMode::Sd576p50Wide,
        ]);
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"event":"HDMI_CONNECTED","EDID":[6,16,18]}"#);

        let json = serde_json::to_string(&LinkEvent::LinkOff).unwrap();
        assert_eq!(json, r#"{"event":"HDMI_DISCONNECTED"}"#);
    }

    #[test]
    fn test_event_names_match_serialized_tag() {
        let events = [
            LinkEvent::CableConnected,
            LinkEvent::CableDisconnected,
            LinkEvent::LinkOn { modes: vec![16] },
            LinkEvent::LinkOff,
            LinkEvent::Online,
        ];

        for event in events {
            let value = serde_json::to_value(&event).unwrap();
            assert_eq!(value["event"].as_str().unwrap(), event.name());
        }
    }
}
