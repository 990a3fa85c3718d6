//! Error types for the HDMI link daemon.
//!
//! This module defines custom error enums for each component of the daemon,
//! providing descriptive error messages with context information. None of
//! them is fatal to the process: the link degrades to "disconnected" and the
//! daemon keeps observing hardware events.

use thiserror::Error;

/// Errors raised by the link decision core (mode arbitration and output control).
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Sink reported a connection without any usable display mode")]
    EmptyModeSet,

    #[error("Unrecognized display mode descriptor {0}")]
    UnrecognizedMode(u32),

    #[error("Hardware {operation} failed after {attempts} attempts: {source}")]
    HardwareCallFailure {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: HardwareError,
    },

    #[error("Failed to persist user preference: {0}")]
    PersistenceFailure(#[from] PreferenceError),
}

/// Errors related to the physical output enable/disable call.
#[derive(Error, Debug)]
pub enum HardwareError {
    #[error("{0} not found in PATH")]
    CommandNotFound(String),

    #[error("link control command failed with exit code {exit_code:?}: {stderr}")]
    CommandFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Failed to execute command: {0}")]
    ExecutionFailed(#[from] std::io::Error),
}

/// Errors related to the persisted preference store.
#[derive(Error, Debug)]
pub enum PreferenceError {
    #[error("Failed to read preferences from '{path}': {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse preferences: {0}")]
    ParseError(String),

    #[error("Failed to write preferences: {0}")]
    WriteFailed(#[from] std::io::Error),
}

/// Errors related to the hardware hotplug event source and its worker.
#[derive(Error, Debug)]
pub enum HotplugError {
    #[error("Failed to {operation} on udev monitor: {source}")]
    SocketFailed {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to receive hotplug event: {0}")]
    ReceiveFailed(std::io::Error),

    #[error("Hotplug source has already been consumed by a previous start")]
    SourceConsumed,

    #[error("Failed to spawn hotplug worker thread: {0}")]
    SpawnFailed(std::io::Error),
}

/// Errors related to desktop notification delivery.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("D-Bus error: {0}")]
    Bus(#[from] zbus::Error),

    #[error("Notification worker is no longer running")]
    WorkerGone,
}

/// Errors related to IPC server operations.
#[derive(Error, Debug)]
pub enum IpcError {
    #[error("Failed to bind socket at '{path}': {source}")]
    SocketBindFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid command received: {0}")]
    InvalidCommand(String),

    #[error("Failed to serialize response: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors related to configuration management.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Errors related to logging initialization.
#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Could not determine a local data directory for log files")]
    DataDirectoryNotFound,

    #[error("Failed to create log directory '{path}': {source}")]
    DirectoryCreationFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create log file appender: {0}")]
    AppenderCreationFailed(String),
}

/// Top-level daemon errors.
#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("Hotplug error: {0}")]
    Hotplug(#[from] HotplugError),

    #[error("Preference error: {0}")]
    Preference(#[from] PreferenceError),

    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Logging error: {0}")]
    Logging(#[from] LoggingError),
}
