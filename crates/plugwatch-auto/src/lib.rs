//! Hotplug auto-connect for autopilot serial devices
//!
//! This crate decides *when* to open a session with a newly attached
//! autopilot: it listens for device arrivals, recognizes qualifying ports by
//! vendor ID, waits for the device to finish enumerating, and calls the host's
//! connect action once per physical plug event.
//!
//! # Architecture
//!
//! - [`ConnectionGuard`] is an atomic gate; an [`AttemptPermit`] holds it for
//!   the lifetime of one hotplug attempt and releases it on drop.
//! - [`AutoConnectController`] owns the enabled flag, the subscription and
//!   the guard, and runs attempts as supervised tokio tasks.
//! - The host supplies its collaborators (connected/blocked queries, connect
//!   action, notification source, port enumerator) through
//!   [`AutoConnectBuilder`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use plugwatch_auto::AutoConnectController;
//! use plugwatch_detect::{PortMonitor, PortScanner, DEFAULT_POLL_INTERVAL};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let scanner = Arc::new(PortScanner::new());
//! let monitor = Arc::new(PortMonitor::start(scanner.clone(), DEFAULT_POLL_INTERVAL));
//!
//! let controller = AutoConnectController::builder()
//!     .is_connected(|| false)
//!     .should_block(|| false)
//!     .connect(|| Ok(()))
//!     .notifier(monitor)
//!     .enumerator(scanner)
//!     .build()?;
//!
//! controller.set_enabled(true);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod guard;
pub mod host;
pub mod task;

pub use config::{AutoConnectConfig, DEFAULT_ENUMERATION_DELAY_MS};
pub use controller::{AutoConnectBuilder, AutoConnectController};
pub use error::AutoConnectError;
pub use events::{
    AttemptOrigin, AttemptOutcome, AutoConnectEvent, ControllerState, SuppressReason,
};
pub use guard::{AttemptPermit, ConnectionGuard};
pub use host::{ConnectFailure, HostCallbacks};
pub use task::spawn_supervised;
