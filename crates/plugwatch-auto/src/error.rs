//! Error types for the auto-connect controller

use thiserror::Error;

/// Errors raised while building a controller
///
/// Nothing else in this crate returns an error to the caller; failures in
/// background attempts are logged and reported as events.
#[derive(Debug, Error)]
pub enum AutoConnectError {
    /// A required host collaborator was not supplied
    #[error("missing required dependency: {0}")]
    MissingDependency(&'static str),

    /// No runtime handle was supplied and none is current
    #[error("no tokio runtime available for auto-connect tasks")]
    NoRuntime,
}
