//! Serial port scanner
//!
//! This module provides port enumeration and the qualifying-port lookup used
//! by auto-connect.

use serde::{Deserialize, Serialize};
use serialport::{available_ports, SerialPortType};
use tracing::{debug, info};

use crate::error::DetectError;
use crate::usb_ids::{self, DeviceFilter};

/// A port as seen at enumeration time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Port name (e.g., /dev/ttyACM0, COM3)
    pub port_name: String,
    /// Hardware identifier (e.g., `USB\VID_1209&PID_5741`), empty for non-USB ports
    pub hardware_id: String,
}

impl DeviceDescriptor {
    pub fn new(port_name: impl Into<String>, hardware_id: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            hardware_id: hardware_id.into(),
        }
    }

    /// Create from serialport crate's port info
    fn from_serialport(name: String, port_type: &SerialPortType) -> Self {
        match port_type {
            SerialPortType::UsbPort(usb) => Self {
                port_name: name,
                hardware_id: usb_ids::format_hardware_id(
                    usb.vid,
                    usb.pid,
                    usb.serial_number.as_deref(),
                ),
            },
            _ => Self {
                port_name: name,
                hardware_id: String::new(),
            },
        }
    }

    /// Whether this port belongs to a recognized device
    pub fn is_qualifying(&self) -> bool {
        DeviceFilter.matches(&self.hardware_id)
    }
}

/// Source of the currently attached ports
///
/// Enumeration is synchronous and may be slow; run it on a blocking thread.
pub trait PortEnumerator: Send + Sync {
    /// List every attached port with its hardware identifier
    fn list_ports(&self) -> Result<Vec<DeviceDescriptor>, DetectError>;
}

/// Find the first port whose hardware identifier passes the device filter
///
/// Enumeration failure is reported as "no port", never as an error.
pub fn find_qualifying_port(enumerator: &dyn PortEnumerator) -> Option<String> {
    match enumerator.list_ports() {
        Ok(ports) => {
            let found = ports.into_iter().find(DeviceDescriptor::is_qualifying);
            if let Some(port) = &found {
                debug!(
                    port = %port.port_name,
                    vendor = usb_ids::vendor_name(&port.hardware_id).unwrap_or("unknown"),
                    "Qualifying port found"
                );
            }
            found.map(|p| p.port_name)
        }
        Err(e) => {
            info!("Port enumeration failed, treating as no device: {}", e);
            None
        }
    }
}

/// Serial port scanner configuration
#[derive(Debug, Clone, Default)]
pub struct ScannerConfig {
    /// Skip ports matching these patterns
    pub skip_patterns: Vec<String>,
}

/// Serial port scanner backed by the OS port list
pub struct PortScanner {
    config: ScannerConfig,
}

impl PortScanner {
    /// Create a new scanner with default configuration
    pub fn new() -> Self {
        Self {
            config: ScannerConfig {
                skip_patterns: vec![
                    // Bluetooth ports on macOS
                    "Bluetooth".to_string(),
                    // Debug/logging ports
                    "debug".to_string(),
                ],
            },
        }
    }

    /// Create a scanner with custom configuration
    pub fn with_config(config: ScannerConfig) -> Self {
        Self { config }
    }

    /// Enumerate all available serial ports
    pub fn enumerate_ports(&self) -> Result<Vec<DeviceDescriptor>, DetectError> {
        let ports = available_ports().map_err(|e| DetectError::EnumerationFailed(e.to_string()))?;

        let result: Vec<_> = ports
            .into_iter()
            .map(|p| DeviceDescriptor::from_serialport(p.port_name, &p.port_type))
            .filter(|p| !self.should_skip_port(p))
            .collect();

        debug!("Found {} serial port(s)", result.len());
        for port in &result {
            match usb_ids::parse_vid(&port.hardware_id) {
                Some(vid) => debug!(
                    "  {} - {} (VID {:04X})",
                    port.port_name, port.hardware_id, vid
                ),
                None => debug!("  {} - {}", port.port_name, port.hardware_id),
            }
        }

        Ok(result)
    }

    /// Check if a port should be skipped
    fn should_skip_port(&self, port: &DeviceDescriptor) -> bool {
        self.config
            .skip_patterns
            .iter()
            .any(|pattern| port.port_name.contains(pattern.as_str()))
    }
}

impl Default for PortScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl PortEnumerator for PortScanner {
    fn list_ports(&self) -> Result<Vec<DeviceDescriptor>, DetectError> {
        self.enumerate_ports()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serialport::UsbPortInfo;

    struct FixedPorts(Vec<DeviceDescriptor>);

    impl PortEnumerator for FixedPorts {
        fn list_ports(&self) -> Result<Vec<DeviceDescriptor>, DetectError> {
            Ok(self.0.clone())
        }
    }

    struct FailingPorts;

    impl PortEnumerator for FailingPorts {
        fn list_ports(&self) -> Result<Vec<DeviceDescriptor>, DetectError> {
            Err(DetectError::EnumerationFailed("device tree unavailable".into()))
        }
    }

    #[test]
    fn test_descriptor_from_usb() {
        let usb_info = SerialPortType::UsbPort(UsbPortInfo {
            vid: 0x1209,
            pid: 0x5741,
            serial_number: Some("3B0028".to_string()),
            manufacturer: Some("ArduPilot".to_string()),
            product: Some("CubeOrange-BL".to_string()),
        });

        let info = DeviceDescriptor::from_serialport("/dev/ttyACM0".to_string(), &usb_info);

        assert_eq!(info.port_name, "/dev/ttyACM0");
        assert_eq!(info.hardware_id, "USB\\VID_1209&PID_5741\\3B0028");
        assert!(info.is_qualifying());
    }

    #[test]
    fn test_descriptor_from_non_usb() {
        let info =
            DeviceDescriptor::from_serialport("/dev/ttyS0".to_string(), &SerialPortType::Unknown);
        assert!(info.hardware_id.is_empty());
        assert!(!info.is_qualifying());
    }

    #[test]
    fn test_find_qualifying_port_returns_first_match() {
        let ports = FixedPorts(vec![
            DeviceDescriptor::new("COM1", ""),
            DeviceDescriptor::new("COM3", "USB\\VID_0403&PID_6001"),
            DeviceDescriptor::new("COM7", "USB\\VID_2DAE&PID_1016"),
            DeviceDescriptor::new("COM9", "USB\\VID_1209&PID_5741"),
        ]);

        assert_eq!(find_qualifying_port(&ports), Some("COM7".to_string()));
    }

    #[test]
    fn test_find_qualifying_port_none() {
        let ports = FixedPorts(vec![DeviceDescriptor::new("COM3", "USB\\VID_FFFF&PID_0000")]);
        assert_eq!(find_qualifying_port(&ports), None);
        assert_eq!(find_qualifying_port(&FixedPorts(Vec::new())), None);
    }

    #[test]
    fn test_enumeration_failure_is_no_match() {
        assert_eq!(find_qualifying_port(&FailingPorts), None);
    }

    #[test]
    fn test_skip_patterns() {
        let scanner = PortScanner::new();
        assert!(scanner.should_skip_port(&DeviceDescriptor::new(
            "/dev/tty.Bluetooth-Incoming-Port",
            ""
        )));
        assert!(!scanner.should_skip_port(&DeviceDescriptor::new("/dev/ttyACM0", "")));
    }
}
