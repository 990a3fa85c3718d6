//! udev hotplug source.
//!
//! Listens on a udev monitor socket for "online"/"offline" events from the
//! HDMI kobject, then reads the sink's modes through `SinkProbe`.
//!
//! `udev::MonitorSocket` is not `Send`, so the source is built on the
//! observer thread that polls it (see `hotplug::SourceFactory`).

use crate::error::HotplugError;
use crate::hotplug::{HotplugSource, RawHotplugEvent};
use crate::sink_probe::SinkProbe;
use std::collections::VecDeque;
use std::io;
use std::os::fd::AsRawFd;
use std::time::Duration;
use tracing::{debug, trace};

/// Substring of the device path identifying HDMI events.
pub const DEFAULT_UEVENT_FILTER: &str = "hdmi_kobj";

/// What an HDMI event means for the cable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CableChange {
    Attached,
    Detached,
}

/// Classify an event by action and device path; `None` for other devices
/// and other actions.
pub fn classify(action: &str, devpath: &str, filter: &str) -> Option<CableChange> {
    if !devpath.contains(filter) {
        return None;
    }
    match action {
        "online" => Some(CableChange::Attached),
        "offline" => Some(CableChange::Detached),
        _ => None,
    }
}

pub struct UeventSource {
    filter: String,
    probe: SinkProbe,
    socket: Option<udev::MonitorSocket>,
    pending: VecDeque<RawHotplugEvent>,
}

impl UeventSource {
    pub fn new(filter: impl Into<String>, probe: SinkProbe) -> Self {
        Self {
            filter: filter.into(),
            probe,
            socket: None,
            pending: VecDeque::new(),
        }
    }

    fn attached(&self) -> RawHotplugEvent {
        RawHotplugEvent::Connected {
            raw_modes: self.probe.raw_modes(),
        }
    }

    /// Turn a cable change into the event the bridge dispatches. Modes are
    /// read when the change is handled, not when it was queued.
    fn resolve(&self, change: CableChange) -> RawHotplugEvent {
        match change {
            CableChange::Attached => self.attached(),
            CableChange::Detached => RawHotplugEvent::Disconnected,
        }
    }

    /// Drain whatever the socket has buffered, keeping HDMI cable changes.
    fn drain(socket: &udev::MonitorSocket, filter: &str) -> Vec<CableChange> {
        let mut changes = Vec::new();
        for event in socket.iter() {
            let action = event
                .action()
                .map(|a| a.to_string_lossy().into_owned())
                .unwrap_or_default();
            let devpath = event.devpath().to_string_lossy();
            trace!("udev event {}@{}", action, devpath);

            if let Some(change) = classify(&action, &devpath, filter) {
                debug!("HDMI {} event (seq {})", action, event.sequence_number());
                changes.push(change);
            }
        }
        changes
    }
}

impl HotplugSource for UeventSource {
    fn open(&mut self) -> Result<(), HotplugError> {
        // Drop any failed socket before binding a new one
        self.socket = None;
        self.pending.clear();

        let socket = udev::MonitorBuilder::new()
            .and_then(|builder| builder.listen())
            .map_err(|e| HotplugError::SocketFailed {
                operation: "listen",
                source: e,
            })?;
        self.socket = Some(socket);
        debug!("Listening for udev events matching '{}'", self.filter);
        Ok(())
    }

    fn initial_state(&mut self) -> Option<RawHotplugEvent> {
        if self.probe.cable_present() {
            Some(self.attached())
        } else {
            debug!("No sink reported at {:?}", self.probe.state_path());
            None
        }
    }

    fn next_event(&mut self, timeout: Duration) -> Result<Option<RawHotplugEvent>, HotplugError> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }

        let Some(socket) = self.socket.as_ref() else {
            return Err(HotplugError::ReceiveFailed(io::Error::new(
                io::ErrorKind::NotConnected,
                "udev monitor is not open",
            )));
        };

        if !wait_readable(socket, timeout)? {
            return Ok(None);
        }

        for change in Self::drain(socket, &self.filter) {
            let event = self.resolve(change);
            self.pending.push_back(event);
        }
        Ok(self.pending.pop_front())
    }
}

/// Wait up to `timeout` for the monitor to become readable.
fn wait_readable(socket: &udev::MonitorSocket, timeout: Duration) -> Result<bool, HotplugError> {
    let mut poll_fd = libc::pollfd {
        fd: socket.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };
    let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;

    // Safety: `poll_fd` is a single valid pollfd living for the whole call
    let ready = unsafe { libc::poll(&mut poll_fd, 1, timeout_ms) };
    if ready < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(HotplugError::ReceiveFailed(err));
    }
    if ready == 0 {
        return Ok(false);
    }
    if poll_fd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
        return Err(HotplugError::ReceiveFailed(io::Error::new(
            io::ErrorKind::BrokenPipe,
            format!("udev monitor reported revents {:#x}", poll_fd.revents),
        )));
    }
    Ok(true)
}
