//! IPC Server module for client communication.
//!
//! This module provides a Unix Domain Socket server for receiving commands
//! from the settings UI and the audio router, sending status responses and
//! streaming link events to subscribers.

use crate::error::IpcError;
use crate::event_bus::BroadcastBus;
use crate::link_state::LinkPhase;
use crate::output_controller::{LinkSnapshot, OutputController};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[cfg(unix)]
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
#[cfg(unix)]
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};
#[cfg(unix)]
use tokio::sync::broadcast::error::RecvError;

/// Default socket path for IPC communication.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/hdmi-link.sock";

/// Commands that can be received via IPC.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "command")]
pub enum IpcCommand {
    /// Persist and apply the user's on/off choice.
    SetOutput { enabled: bool },
    GetStatus,
    /// Audio path started using the link.
    AudioOn,
    /// Audio path stopped using the link.
    AudioOff,
    /// Announce that the service is online.
    WakeUp,
    /// Re-post the connected notice.
    RefreshNotice,
    /// Turn the connection into a stream of link events.
    Subscribe,
}

/// Status response sent to clients.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StatusResponse {
    pub connected: bool,
    pub user_enabled: bool,
    /// "on" when the output is live, "off" otherwise.
    pub effective: String,
    pub selected_mode: Option<String>,
    pub modes: Vec<String>,
    pub hotplug_active: bool,
}

impl StatusResponse {
    pub fn from_snapshot(snapshot: &LinkSnapshot, hotplug_active: bool) -> Self {
        Self {
            connected: snapshot.phase == LinkPhase::ConnectedModesKnown,
            user_enabled: snapshot.user_enabled,
            effective: if snapshot.selected_mode.is_some() { "on" } else { "off" }.to_string(),
            selected_mode: snapshot.selected_mode.map(|m| m.to_string()),
            modes: snapshot.modes.iter().map(|m| m.to_string()).collect(),
            hotplug_active,
        }
    }
}

/// Shared daemon state accessible by the IPC server.
pub struct DaemonState {
    pub controller: Arc<OutputController>,
    /// Source of events for `Subscribe` connections
    pub bus: Arc<BroadcastBus>,
    /// Whether the hotplug observer thread was started
    pub hotplug_active: AtomicBool,
}

impl DaemonState {
    pub fn new(controller: Arc<OutputController>, bus: Arc<BroadcastBus>) -> Self {
        Self {
            controller,
            bus,
            hotplug_active: AtomicBool::new(false),
        }
    }

    pub fn set_hotplug_active(&self, active: bool) {
        self.hotplug_active.store(active, Ordering::SeqCst);
    }

    /// Get the current status as a StatusResponse.
    pub fn get_status(&self) -> StatusResponse {
        StatusResponse::from_snapshot(
            &self.controller.snapshot(),
            self.hotplug_active.load(Ordering::SeqCst),
        )
    }
}

/// Run a controller call off the async workers; hardware calls may block.
async fn blocking<F, T>(state: &Arc<DaemonState>, call: F) -> Result<T, String>
where
    F: FnOnce(&OutputController) -> T + Send + 'static,
    T: Send + 'static,
{
    let controller = Arc::clone(&state.controller);
    tokio::task::spawn_blocking(move || call(&controller))
        .await
        .map_err(|e| format!("Controller task failed: {}", e))
}

/// Unix Domain Socket server for IPC.
#[cfg(unix)]
pub struct IpcServer {
    /// Path to the Unix socket
    socket_path: PathBuf,
    /// Unix listener for incoming connections
    listener: UnixListener,
}

#[cfg(unix)]
impl IpcServer {
    /// Create a new IPC server at the specified path.
    ///
    /// This will:
    /// 1. Remove any existing socket file at the path
    /// 2. Bind a new Unix socket at the path
    pub async fn new(path: &Path) -> Result<Self, IpcError> {
        let socket_path = path.to_path_buf();

        Self::cleanup_socket(&socket_path)?;

        let listener = UnixListener::bind(&socket_path).map_err(|e| IpcError::SocketBindFailed {
            path: path.display().to_string(),
            source: e,
        })?;

        Ok(Self {
            socket_path,
            listener,
        })
    }

    /// Clean up an existing socket file.
    fn cleanup_socket(path: &Path) -> Result<(), IpcError> {
        if path.exists() {
            std::fs::remove_file(path).map_err(|e| IpcError::SocketBindFailed {
                path: path.display().to_string(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// Get the socket path.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept and handle incoming connections.
    ///
    /// This runs in a loop, accepting connections and spawning tasks to handle them.
    pub async fn run(&self, state: Arc<DaemonState>) -> Result<(), IpcError> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_connection(stream, state).await {
                            tracing::warn!("Error handling IPC connection: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Error accepting IPC connection: {}", e);
                }
            }
        }
    }

    /// Handle a single client connection.
    async fn handle_connection(
        stream: UnixStream,
        state: Arc<DaemonState>,
    ) -> Result<(), IpcError> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        // Read commands line by line (newline-delimited JSON)
        while reader.read_line(&mut line).await? > 0 {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                line.clear();
                continue;
            }

            let response = match serde_json::from_str::<IpcCommand>(trimmed) {
                Ok(IpcCommand::Subscribe) => {
                    // The connection belongs to the event stream from here on
                    return Self::stream_events(reader, writer, &state).await;
                }
                Ok(command) => Self::handle_command(command, &state).await,
                Err(e) => {
                    let err = IpcError::InvalidCommand(e.to_string());
                    tracing::debug!("{}", err);
                    serde_json::json!({ "success": false, "error": err.to_string() })
                }
            };

            Self::write_line(&mut writer, &response).await?;
            line.clear();
        }

        Ok(())
    }

    async fn write_line<T: Serialize>(writer: &mut OwnedWriteHalf, value: &T) -> Result<(), IpcError> {
        let line = serde_json::to_string(value)?;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    /// Forward every published event to the client until it disconnects.
    async fn stream_events(
        mut reader: BufReader<OwnedReadHalf>,
        mut writer: OwnedWriteHalf,
        state: &Arc<DaemonState>,
    ) -> Result<(), IpcError> {
        let mut events = state.bus.subscribe();
        tracing::info!("IPC client subscribed to link events");
        Self::write_line(
            &mut writer,
            &serde_json::json!({ "success": true, "message": "Subscribed" }),
        )
        .await?;

        // Anything the client sends after subscribing is ignored
        let mut discard = String::new();
        loop {
            tokio::select! {
                received = events.recv() => match received {
                    Ok(event) => Self::write_line(&mut writer, &event).await?,
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!("IPC subscriber lagged, {} events dropped", missed);
                        Self::write_line(&mut writer, &serde_json::json!({ "lagged": missed })).await?;
                    }
                    Err(RecvError::Closed) => return Ok(()),
                },
                read = reader.read_line(&mut discard) => {
                    if read? == 0 {
                        tracing::debug!("IPC subscriber disconnected");
                        return Ok(());
                    }
                    discard.clear();
                }
            }
        }
    }

    /// Handle a single IPC command and return the response.
    pub async fn handle_command(
        command: IpcCommand,
        state: &Arc<DaemonState>,
    ) -> serde_json::Value {
        match command {
            IpcCommand::SetOutput { enabled } => {
                match blocking(state, move |c| c.set_user_preference(enabled)).await {
                    Ok(Ok(())) => {
                        tracing::info!("HDMI output set to {} via IPC", enabled);
                        serde_json::json!({ "success": true, "enabled": enabled })
                    }
                    // Applied in memory even when reported as failed
                    Ok(Err(e)) => {
                        tracing::warn!("SetOutput via IPC reported: {}", e);
                        serde_json::json!({ "success": false, "enabled": enabled, "error": e.to_string() })
                    }
                    Err(e) => serde_json::json!({ "success": false, "error": e }),
                }
            }

            IpcCommand::GetStatus => {
                let status = state.get_status();
                serde_json::to_value(status).unwrap_or_else(|e| {
                    serde_json::json!({
                        "error": format!("Failed to serialize status: {}", e)
                    })
                })
            }

            IpcCommand::AudioOn => Self::simple(blocking(state, |c| c.notify_audio_path_active()).await),

            IpcCommand::AudioOff => {
                Self::simple(blocking(state, |c| c.notify_audio_path_inactive()).await)
            }

            IpcCommand::WakeUp => Self::simple(blocking(state, |c| c.announce_online()).await),

            IpcCommand::RefreshNotice => match blocking(state, |c| c.refresh_notice()).await {
                Ok(refreshed) => serde_json::json!({ "success": true, "refreshed": refreshed }),
                Err(e) => serde_json::json!({ "success": false, "error": e }),
            },

            IpcCommand::Subscribe => serde_json::json!({
                "success": false,
                "error": "Subscribe is only available on a socket connection"
            }),
        }
    }

    fn simple(result: Result<(), String>) -> serde_json::Value {
        match result {
            Ok(()) => serde_json::json!({ "success": true }),
            Err(e) => serde_json::json!({ "success": false, "error": e }),
        }
    }
}

#[cfg(unix)]
impl Drop for IpcServer {
    fn drop(&mut self) {
        // Clean up socket file on drop
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{EventBus, LinkEvent, PreferenceStore};
    use crate::mode_catalog::DisplayMode;
    use crate::output_controller::tests::{scenario_modes, Call, Harness};
    use crate::output_controller::{USER_OPTION_KEY, USER_OPTION_OFF};
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn state_for(h: &Harness) -> Arc<DaemonState> {
        Arc::new(DaemonState::new(
            Arc::clone(&h.controller),
            Arc::new(BroadcastBus::default()),
        ))
    }

    #[test]
    fn test_command_wire_format() {
        let parsed: IpcCommand =
            serde_json::from_str(r#"{"command":"SetOutput","enabled":true}"#).unwrap();
        assert_eq!(parsed, IpcCommand::SetOutput { enabled: true });

        let parsed: IpcCommand = serde_json::from_str(r#"{"command":"AudioOff"}"#).unwrap();
        assert_eq!(parsed, IpcCommand::AudioOff);

        assert!(serde_json::from_str::<IpcCommand>(r#"{"command":"SetOutput"}"#).is_err());
        assert!(serde_json::from_str::<IpcCommand>(r#"{"command":"Reboot"}"#).is_err());
    }

    #[test]
    fn test_status_while_idle() {
        let h = Harness::new(true);
        let state = state_for(&h);
        let status = state.get_status();

        assert!(!status.connected);
        assert!(status.user_enabled);
        assert_eq!(status.effective, "off");
        assert!(status.selected_mode.is_none());
        assert!(status.modes.is_empty());
        assert!(!status.hotplug_active);
    }

    #[test]
    fn test_status_while_live() {
        let h = Harness::new(true);
        let state = state_for(&h);
        state.set_hotplug_active(true);
        h.controller.on_cable_connected(scenario_modes()).unwrap();

        let status = state.get_status();
        assert!(status.connected);
        assert_eq!(status.effective, "on");
        assert_eq!(
            status.selected_mode,
            Some(DisplayMode::Hd1080p60.to_string())
        );
        assert_eq!(status.modes.len(), 3);
        assert!(status.hotplug_active);

        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"effective\":\"on\""));
    }

    #[tokio::test]
    async fn test_handle_set_output() {
        let h = Harness::new(true);
        let state = state_for(&h);
        h.controller.on_cable_connected(scenario_modes()).unwrap();
        h.take_calls();

        let response =
            IpcServer::handle_command(IpcCommand::SetOutput { enabled: false }, &state).await;
        assert_eq!(response["success"], true);
        assert!(h.take_calls().contains(&Call::Disable));
        assert_eq!(
            h.preferences.get(USER_OPTION_KEY).unwrap().as_deref(),
            Some(USER_OPTION_OFF)
        );
        assert_eq!(state.get_status().effective, "off");
    }

    #[tokio::test]
    async fn test_handle_audio_and_wakeup() {
        let h = Harness::new(true);
        let state = state_for(&h);
        h.controller.on_cable_connected(scenario_modes()).unwrap();
        h.take_calls();

        let response = IpcServer::handle_command(IpcCommand::AudioOn, &state).await;
        assert_eq!(response["success"], true);
        IpcServer::handle_command(IpcCommand::AudioOff, &state).await;
        IpcServer::handle_command(IpcCommand::WakeUp, &state).await;

        assert_eq!(
            h.take_calls(),
            vec![
                Call::Publish(LinkEvent::link_on(&scenario_modes())),
                Call::Publish(LinkEvent::LinkOff),
                Call::Publish(LinkEvent::Online),
            ]
        );
    }

    #[tokio::test]
    async fn test_handle_refresh_notice() {
        let h = Harness::new(true);
        let state = state_for(&h);

        let response = IpcServer::handle_command(IpcCommand::RefreshNotice, &state).await;
        assert_eq!(response["refreshed"], false);

        h.controller.on_cable_connected(scenario_modes()).unwrap();
        let response = IpcServer::handle_command(IpcCommand::RefreshNotice, &state).await;
        assert_eq!(response["refreshed"], true);
    }

    #[tokio::test]
    async fn test_handle_get_status() {
        let h = Harness::new(false);
        let state = state_for(&h);
        let response = IpcServer::handle_command(IpcCommand::GetStatus, &state).await;
        let status: StatusResponse = serde_json::from_value(response).unwrap();
        assert!(!status.user_enabled);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ipc_server_creation_and_cleanup() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("test.sock");

        let server = IpcServer::new(&socket_path).await.unwrap();
        assert!(socket_path.exists());
        assert_eq!(server.socket_path(), socket_path.as_path());

        drop(server);
        assert!(!socket_path.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ipc_server_replaces_existing_socket() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("test.sock");
        std::fs::write(&socket_path, "dummy").unwrap();

        let server = IpcServer::new(&socket_path).await.unwrap();
        assert!(socket_path.exists());
        drop(server);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_socket_request_response_and_subscribe() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("link.sock");
        let h = Harness::new(true);
        let state = state_for(&h);

        let server = IpcServer::new(&socket_path).await.unwrap();
        let server_state = Arc::clone(&state);
        let server_task = tokio::spawn(async move {
            let _ = server.run(server_state).await;
        });

        // Request/response, including a malformed line
        let stream = UnixStream::connect(&socket_path).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        writer.write_all(b"not json\n{\"command\":\"GetStatus\"}\n").await.unwrap();
        let error: serde_json::Value =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(error["success"], false);
        let status: StatusResponse =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert!(status.user_enabled);

        // Event stream
        let stream = UnixStream::connect(&socket_path).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut events = BufReader::new(reader).lines();
        writer.write_all(b"{\"command\":\"Subscribe\"}\n").await.unwrap();
        let ack: serde_json::Value =
            serde_json::from_str(&events.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(ack["success"], true);

        state.bus.publish(LinkEvent::LinkOn { modes: vec![16, 6, 18] });
        state.bus.publish(LinkEvent::LinkOff);
        assert_eq!(
            events.next_line().await.unwrap().unwrap(),
            r#"{"event":"HDMI_CONNECTED","EDID":[16,6,18]}"#
        );
        assert_eq!(
            events.next_line().await.unwrap().unwrap(),
            r#"{"event":"HDMI_DISCONNECTED"}"#
        );

        server_task.abort();
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Effective output is "on" exactly when a mode is selected.
        #[test]
        fn prop_status_effective_tracks_selection(
            user_enabled in any::<bool>(),
            connect in any::<bool>(),
        ) {
            let h = Harness::new(user_enabled);
            let state = state_for(&h);
            if connect {
                let _ = h.controller.on_cable_connected(scenario_modes());
            }

            let status = state.get_status();
            prop_assert_eq!(status.connected, connect);
            prop_assert_eq!(status.effective == "on", user_enabled && connect);
            prop_assert_eq!(status.selected_mode.is_some(), user_enabled && connect);
        }
    }
}
