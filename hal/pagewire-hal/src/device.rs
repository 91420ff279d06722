//! Enumerated bridge devices

use heapless::{String, Vec};

/// Maximum number of devices reported by a single enumeration
pub const MAX_DEVICES: usize = 10;

/// Maximum description length
pub const MAX_DESCRIPTION_LEN: usize = 64;

/// Maximum serial number length
pub const MAX_SERIAL_LEN: usize = 16;

/// Location id reported for a device whose USB location is not yet known.
///
/// Seen after a hot-plug when the driver still holds a stale handle; the
/// port has to be cycled before the device can be opened.
pub const LOCATION_UNASSIGNED: u32 = 0;

/// Device list returned by [`crate::Transport::enumerate`]
pub type DeviceList = Vec<DeviceInfo, MAX_DEVICES>;

/// One entry of the driver's device list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceInfo {
    /// Product description from the EEPROM
    pub description: String<MAX_DESCRIPTION_LEN>,
    /// Serial number from the EEPROM
    pub serial: String<MAX_SERIAL_LEN>,
    /// Combined VID/PID
    pub id: u32,
    /// USB bus location
    pub location_id: u32,
}

impl DeviceInfo {
    /// Create a device entry, truncating over-long strings
    pub fn new(description: &str, serial: &str, id: u32, location_id: u32) -> Self {
        Self {
            description: truncated(description),
            serial: truncated(serial),
            id,
            location_id,
        }
    }

    /// Check whether the driver has assigned a bus location yet
    pub fn has_location(&self) -> bool {
        self.location_id != LOCATION_UNASSIGNED
    }
}

fn truncated<const N: usize>(text: &str) -> String<N> {
    let mut out = String::new();
    for ch in text.chars() {
        if out.push(ch).is_err() {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_strings_are_truncated() {
        let serial = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
        let info = DeviceInfo::new("FT232H", serial, 0x0403_6014, 0x21);
        assert_eq!(info.serial.as_str(), &serial[..MAX_SERIAL_LEN]);
        assert_eq!(info.description.as_str(), "FT232H");
    }

    #[test]
    fn test_unassigned_location() {
        let info = DeviceInfo::new("FT232H", "FT1", 0x0403_6014, LOCATION_UNASSIGNED);
        assert!(!info.has_location());
        let info = DeviceInfo::new("FT232H", "FT1", 0x0403_6014, 0x112);
        assert!(info.has_location());
    }
}
