//! Error types for port detection

use thiserror::Error;

/// Errors that can occur while enumerating or watching ports
#[derive(Debug, Error)]
pub enum DetectError {
    /// Failed to enumerate serial ports
    #[error("failed to enumerate ports: {0}")]
    EnumerationFailed(String),

    /// The enumeration task was cancelled or panicked
    #[error("enumeration task aborted: {0}")]
    TaskAborted(String),

    /// Serial port error
    #[error("serial port error: {0}")]
    SerialPort(#[from] serialport::Error),
}
