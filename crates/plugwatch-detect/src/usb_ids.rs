//! USB vendor allow-list for autopilot hardware
//!
//! Recognition works on the textual hardware identifier reported for a port
//! (`USB\VID_1209&PID_5741\...`), not on parsed numbers, so identifiers from
//! any source (PnP strings, udev properties, synthesized by the scanner) can
//! be checked the same way.

/// A vendor token that qualifies a device for auto-connect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VendorToken {
    /// USB Vendor ID
    pub vid: u16,
    /// Token as it appears in a hardware identifier (uppercase)
    pub token: &'static str,
    /// Vendor class name for logs
    pub name: &'static str,
}

impl VendorToken {
    pub const fn new(vid: u16, token: &'static str, name: &'static str) -> Self {
        Self { vid, token, name }
    }
}

/// pid.codes open-hardware VID, used by ArduPilot/ChibiOS bootloaders
pub mod pid_codes {
    use super::VendorToken;

    pub const VID: u16 = 0x1209;
    pub const TOKEN: VendorToken = VendorToken::new(VID, "VID_1209", "pid.codes bootloader");

    pub const CHIBIOS_APP_PID: u16 = 0x5740;
    pub const CHIBIOS_BOOTLOADER_PID: u16 = 0x5741;
}

/// 3D Robotics / PX4 reference boards
pub mod px4 {
    use super::VendorToken;

    pub const VID: u16 = 0x26AC;
    pub const TOKEN: VendorToken = VendorToken::new(VID, "VID_26AC", "3DR/PX4");
}

/// CubePilot (OEM-rebranded Cube boards)
pub mod cubepilot {
    use super::VendorToken;

    pub const VID: u16 = 0x2DAE;
    pub const TOKEN: VendorToken = VendorToken::new(VID, "VID_2DAE", "CubePilot");
}

/// Holybro
pub mod holybro {
    use super::VendorToken;

    pub const VID: u16 = 0x3162;
    pub const TOKEN: VendorToken = VendorToken::new(VID, "VID_3162", "Holybro");
}

/// ProfiCNC, legacy Cube boards shipped before the CubePilot VID
pub mod proficnc {
    use super::VendorToken;

    pub const VID: u16 = 0x27AC;
    pub const TOKEN: VendorToken = VendorToken::new(VID, "VID_27AC", "ProfiCNC");
}

/// STMicroelectronics VCP/DFU, used by legacy microcontroller firmware
pub mod stmicro {
    use super::VendorToken;

    pub const VID: u16 = 0x0483;
    pub const TOKEN: VendorToken = VendorToken::new(VID, "VID_0483", "STMicroelectronics");
}

/// Every vendor token that qualifies a port
pub const ALLOW_LIST: &[VendorToken] = &[
    pid_codes::TOKEN,
    px4::TOKEN,
    cubepilot::TOKEN,
    holybro::TOKEN,
    proficnc::TOKEN,
    stmicro::TOKEN,
];

/// Predicate deciding whether a hardware identifier names a recognized device
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceFilter;

impl DeviceFilter {
    /// Check a hardware identifier against the allow-list (case-insensitive)
    pub fn matches(&self, hardware_id: &str) -> bool {
        self.matching_token(hardware_id).is_some()
    }

    /// The allow-list entry a hardware identifier matches, if any
    pub fn matching_token(&self, hardware_id: &str) -> Option<&'static VendorToken> {
        if hardware_id.is_empty() {
            return None;
        }
        let upper = hardware_id.to_uppercase();
        ALLOW_LIST.iter().find(|t| upper.contains(t.token))
    }
}

/// Check an optional hardware identifier; `None` never matches
pub fn matches(hardware_id: Option<&str>) -> bool {
    hardware_id.is_some_and(|id| DeviceFilter.matches(id))
}

/// Vendor class name for a hardware identifier, if it is recognized
pub fn vendor_name(hardware_id: &str) -> Option<&'static str> {
    DeviceFilter.matching_token(hardware_id).map(|t| t.name)
}

/// Extract the vendor ID from a `VID_xxxx` hardware identifier
pub fn parse_vid(hardware_id: &str) -> Option<u16> {
    let upper = hardware_id.to_uppercase();
    let start = upper.find("VID_")? + 4;
    let hex = upper.get(start..start + 4)?;
    u16::from_str_radix(hex, 16).ok()
}

/// Render a Windows-style PnP hardware identifier from USB descriptors
pub fn format_hardware_id(vid: u16, pid: u16, serial_number: Option<&str>) -> String {
    match serial_number {
        Some(serial) if !serial.is_empty() => {
            format!("USB\\VID_{:04X}&PID_{:04X}\\{}", vid, pid, serial)
        }
        _ => format!("USB\\VID_{:04X}&PID_{:04X}", vid, pid),
    }
}
