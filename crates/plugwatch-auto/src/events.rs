//! Controller state and event stream
//!
//! Every decision the controller makes is emitted as an [`AutoConnectEvent`]
//! when an event channel is configured. Hosts use it for logging and status
//! display; tests use it to observe background attempts.

use std::fmt;

/// Observable controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Not subscribed; no action originates from the controller
    Disabled,
    /// Subscribed and waiting for an arrival
    EnabledIdle,
    /// Subscribed and a hotplug attempt holds the guard
    EnabledAttemptPending,
}

/// What started an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOrigin {
    /// Scan launched right after enabling
    Startup,
    /// Device arrival notification
    Hotplug,
}

impl fmt::Display for AttemptOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Startup => write!(f, "startup"),
            Self::Hotplug => write!(f, "hotplug"),
        }
    }
}

/// Why an arrival or attempt did not lead to a connect call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    /// Auto-connect is disabled
    Disabled,
    /// The host already has a session open
    AlreadyConnected,
    /// The host asked for auto-connect to be held off
    Blocked,
    /// Another hotplug attempt holds the guard
    AttemptPending,
}

/// How an attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The host connect action was invoked and returned success
    ConnectInvoked {
        /// Port that qualified the attempt
        port: String,
    },
    /// No qualifying port was attached
    NoDevice,
    /// A suppression check stopped the attempt before connecting
    Suppressed(SuppressReason),
    /// Scanning or connecting failed
    Failed(String),
}

impl AttemptOutcome {
    pub fn is_connect_invoked(&self) -> bool {
        matches!(self, Self::ConnectInvoked { .. })
    }
}

/// Events emitted by the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoConnectEvent {
    /// Subscribed to device-change notifications
    Enabled,
    /// Unsubscribed
    Disabled,
    /// An arrival notification was dropped before acquiring the guard
    ArrivalIgnored {
        /// Reason it was dropped
        reason: SuppressReason,
    },
    /// A qualifying port was found and an attempt is underway
    AttemptStarted {
        origin: AttemptOrigin,
        port: String,
    },
    /// An attempt task has finished and released the guard
    AttemptFinished {
        origin: AttemptOrigin,
        outcome: AttemptOutcome,
    },
    /// The guard was forcibly released
    GuardReset {
        /// Whether an attempt held it at the time
        was_held: bool,
    },
}
