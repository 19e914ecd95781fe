//! Host collaborators injected into the controller

use std::fmt;
use std::sync::Arc;

use plugwatch_detect::{DeviceChangeSource, PortEnumerator};

use crate::events::SuppressReason;

/// Error returned by a host connect action
pub type ConnectFailure = Box<dyn std::error::Error + Send + Sync>;

/// Cheap status query (connected, blocked)
pub type StatusFn = Arc<dyn Fn() -> bool + Send + Sync>;

/// Host action that opens a session; called from a blocking worker thread
pub type ConnectFn = Arc<dyn Fn() -> Result<(), ConnectFailure> + Send + Sync>;

/// Everything the controller needs from its host
#[derive(Clone)]
pub struct HostCallbacks {
    /// Whether a session is already open
    pub is_connected: StatusFn,
    /// Whether auto-connect must currently hold off (e.g. firmware flashing)
    pub should_block: StatusFn,
    /// Start a connection attempt
    pub connect: ConnectFn,
    /// Device-change notifications
    pub notifier: Arc<dyn DeviceChangeSource>,
    /// Attached ports
    pub enumerator: Arc<dyn PortEnumerator>,
}

impl HostCallbacks {
    /// The host-side reason to skip connecting, connected state first
    pub fn suppression(&self) -> Option<SuppressReason> {
        if (self.is_connected)() {
            Some(SuppressReason::AlreadyConnected)
        } else if (self.should_block)() {
            Some(SuppressReason::Blocked)
        } else {
            None
        }
    }
}

impl fmt::Debug for HostCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostCallbacks").finish_non_exhaustive()
    }
}
