//! Serial port detection for autopilot hardware
//!
//! This crate enumerates serial ports, recognizes autopilot boards by their
//! USB vendor ID, and turns port-list changes into device-change
//! notifications.
//!
//! # Example
//!
//! ```rust,no_run
//! use plugwatch_detect::{find_qualifying_port, PortScanner};
//!
//! let scanner = PortScanner::new();
//! if let Some(port) = find_qualifying_port(&scanner) {
//!     println!("Autopilot on {}", port);
//! }
//! ```

pub mod error;
pub mod monitor;
pub mod notify;
pub mod scanner;
pub mod usb_ids;

pub use error::DetectError;
pub use monitor::{diff_ports, PortChanges, PortMonitor, DEFAULT_POLL_INTERVAL};
pub use notify::{
    DeviceChangeHandler, DeviceChangeKind, DeviceChangeSource, Subscribers, SubscriptionId,
};
pub use scanner::{
    find_qualifying_port, DeviceDescriptor, PortEnumerator, PortScanner, ScannerConfig,
};
pub use usb_ids::{DeviceFilter, VendorToken};
