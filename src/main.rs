//! HDMI link daemon.
//!
//! Watches the HDMI port for cable events, picks the best display mode the
//! sink supports, switches the physical output according to the user's
//! preference and tells the rest of the system (notifications, event
//! subscribers) what happened.

mod collaborators;
mod config;
mod error;
mod event_bus;
mod hardware;
mod hotplug;
mod ipc_server;
mod link_state;
mod logging;
mod mode_catalog;
mod notifier;
mod output_controller;
mod platform;
mod preferences;
mod sink_probe;
mod uevent;

use config::{ConfigManager, DaemonConfig};
use error::DaemonError;
use event_bus::BroadcastBus;
use hardware::CommandHardwareLink;
use hotplug::{BridgeSettings, HotplugBridge, HotplugSource, SourceFactory};
use ipc_server::DaemonState;
use notifier::DesktopNotifier;
use output_controller::OutputController;
use platform::PlatformCapability;
use preferences::FilePreferenceStore;
use sink_probe::SinkProbe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uevent::UeventSource;

#[cfg(unix)]
use ipc_server::IpcServer;

/// Graceful shutdown timeout in seconds
const SHUTDOWN_TIMEOUT_SECS: u64 = 2;

/// Delay before rebinding the IPC socket after a failure
const IPC_RESTART_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _log_guard = logging::init_logging().map_err(|e| {
        eprintln!("Failed to initialize logging: {}", e);
        e
    })?;

    info!("HDMI link daemon starting...");

    let result = run_daemon().await;

    match &result {
        Ok(()) => info!("HDMI link daemon shut down gracefully"),
        Err(e) => error!("HDMI link daemon error: {}", e),
    }

    result.map_err(Into::into)
}

/// Main daemon entry point.
async fn run_daemon() -> Result<(), DaemonError> {
    let config_path = ConfigManager::default_path();
    let config_manager = ConfigManager::load_or_default(&config_path)?;
    info!("Configuration loaded from {:?}", config_manager.path());
    let config = config_manager.get();

    // Collaborators
    let preferences = Arc::new(FilePreferenceStore::load_or_empty(&config.preferences_path));
    info!("User preferences at {:?}", preferences.path());

    let hardware = Arc::new(CommandHardwareLink::new(config.hardware_command.clone()));
    info!("Output switched through '{}'", hardware.program());

    let (notifier, notifier_task) = DesktopNotifier::channel();
    tokio::spawn(notifier_task.run());

    let bus = Arc::new(BroadcastBus::default());

    let controller = Arc::new(OutputController::new(
        hardware,
        Arc::new(notifier),
        bus.clone(),
        preferences,
    ));
    controller.announce_online();

    let daemon_state = Arc::new(DaemonState::new(Arc::clone(&controller), bus));

    // Hotplug observation, only on devices with an HDMI port
    let capability = PlatformCapability::detect(&config);
    let mut bridge = build_bridge(&config, &capability, Arc::clone(&controller));
    match bridge.start() {
        Ok(started) => daemon_state.set_hotplug_active(started),
        Err(e) => error!("Failed to start hotplug observer: {}", e),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = setup_signal_handlers(shutdown_tx_clone).await {
            error!("Signal handler error: {}", e);
        }
    });

    let ipc_state = Arc::clone(&daemon_state);
    let ipc_shutdown_rx = shutdown_rx.clone();
    let socket_path = config.socket_path.clone();
    let ipc_handle = tokio::spawn(async move {
        run_ipc_server_with_restart(ipc_state, socket_path, ipc_shutdown_rx).await
    });

    info!("HDMI link daemon initialized and running");

    let mut shutdown_rx_main = shutdown_rx.clone();
    shutdown_rx_main.changed().await.ok();

    info!("Shutdown signal received, stopping tasks...");

    // Joining the observer can take up to one poll interval
    let shutdown_timeout = Duration::from_secs(SHUTDOWN_TIMEOUT_SECS);
    let stopped = tokio::time::timeout(shutdown_timeout, async move {
        let hotplug = tokio::task::spawn_blocking(move || bridge.stop());
        let _ = tokio::join!(ipc_handle, hotplug);
    })
    .await;

    if stopped.is_err() {
        warn!("Tasks did not stop within {}s", SHUTDOWN_TIMEOUT_SECS);
    }

    info!("All tasks stopped");
    Ok(())
}

fn build_bridge(
    config: &DaemonConfig,
    capability: &PlatformCapability,
    controller: Arc<OutputController>,
) -> HotplugBridge {
    let probe = SinkProbe::new(&config.state_path, &config.modes_path);
    let filter = config.uevent_filter.clone();
    let settings = BridgeSettings {
        enabled: capability.supports_hdmi(),
        poll_interval: config.poll_interval(),
        retry_interval: config.retry_interval(),
    };

    // The udev monitor is opened on the observer thread
    let factory: SourceFactory =
        Box::new(move || Box::new(UeventSource::new(filter, probe)) as Box<dyn HotplugSource>);
    HotplugBridge::new(controller, factory, settings)
}

/// Set up signal handlers for graceful shutdown.
/// Handles SIGTERM and SIGINT.
#[cfg(unix)]
async fn setup_signal_handlers(
    shutdown_tx: watch::Sender<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }

    let _ = shutdown_tx.send(true);
    Ok(())
}

/// Stub signal handler for non-Unix platforms
#[cfg(not(unix))]
async fn setup_signal_handlers(
    shutdown_tx: watch::Sender<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C");
    let _ = shutdown_tx.send(true);
    Ok(())
}

/// Run the IPC server, rebinding after failures until shutdown.
async fn run_ipc_server_with_restart(
    state: Arc<DaemonState>,
    socket_path: PathBuf,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("IPC server shutting down");
                    break;
                }
            }
            result = run_ipc_server_inner(Arc::clone(&state), &socket_path) => {
                match result {
                    Ok(()) => break,
                    Err(e) => {
                        error!("IPC server error: {}, restarting in {} seconds", e, IPC_RESTART_SECS);
                        tokio::time::sleep(Duration::from_secs(IPC_RESTART_SECS)).await;
                    }
                }
            }
        }
    }
}

/// Inner IPC server loop
#[cfg(unix)]
async fn run_ipc_server_inner(
    state: Arc<DaemonState>,
    socket_path: &std::path::Path,
) -> Result<(), error::IpcError> {
    let server = IpcServer::new(socket_path).await?;
    info!("IPC server listening on {:?}", server.socket_path());
    server.run(state).await
}

/// Stub IPC server for non-Unix platforms
#[cfg(not(unix))]
async fn run_ipc_server_inner(
    _state: Arc<DaemonState>,
    _socket_path: &std::path::Path,
) -> Result<(), error::IpcError> {
    warn!("IPC server not available on this platform");
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
