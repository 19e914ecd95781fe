//! Error types for the plugwatch daemon

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in the daemon
#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Could not determine settings path")]
    NoSettingsPath,

    #[error("Settings I/O error at {path}: {source}")]
    SettingsIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Settings format error: {0}")]
    SettingsFormat(#[from] serde_json::Error),

    #[error("No qualifying device attached")]
    NoDevice,

    #[error("Failed to open {port}: {source}")]
    OpenFailed {
        port: String,
        #[source]
        source: tokio_serial::Error,
    },
}
