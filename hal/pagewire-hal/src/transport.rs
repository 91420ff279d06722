//! Bridge-chip transport abstraction
//!
//! Provides the raw operations the protocol engine builds I2C on top of.
//! Implementations wrap a vendor driver; none of them know anything about
//! I2C framing.

use core::fmt;

use crate::device::DeviceList;

/// Transport failure
///
/// Any non-OK status from the driver maps to one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportError {
    /// No device at the requested index
    DeviceNotFound,
    /// Handle is closed or was never valid
    InvalidHandle,
    /// Operation requires an open device
    DeviceNotOpened,
    /// USB read/write failure
    Io,
    /// Any other driver status
    Other,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::DeviceNotFound => f.write_str("device not found"),
            TransportError::InvalidHandle => f.write_str("invalid handle"),
            TransportError::DeviceNotOpened => f.write_str("device not opened"),
            TransportError::Io => f.write_str("I/O error"),
            TransportError::Other => f.write_str("driver error"),
        }
    }
}

/// Bit-mode selector for [`Transport::set_bit_mode`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BitMode {
    /// Back to whatever the EEPROM configures (plain serial/GPIO)
    Reset,
    /// Multi-Protocol Synchronous Serial Engine
    Mpsse,
}

impl BitMode {
    /// Driver-level mode value
    pub const fn value(self) -> u8 {
        match self {
            BitMode::Reset => 0x00,
            BitMode::Mpsse => 0x02,
        }
    }
}

/// Event and error character configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SpecialCharacters {
    /// Event character
    pub event: u8,
    /// Enable the event character
    pub event_enabled: bool,
    /// Error character
    pub error: u8,
    /// Enable the error character
    pub error_enabled: bool,
}

impl SpecialCharacters {
    /// Both characters disabled (required for MPSSE)
    pub const DISABLED: Self = Self {
        event: 0,
        event_enabled: false,
        error: 0,
        error_enabled: false,
    };
}

/// Raw bridge-chip operations
///
/// Every call is blocking and bounded by the timeouts configured through
/// [`Transport::set_timeouts`].
pub trait Transport {
    /// Open the device at `index` in the driver's device list
    fn open(&mut self, index: u32) -> Result<(), TransportError>;

    /// Close the handle
    fn close(&mut self) -> Result<(), TransportError>;

    /// Reset the device
    fn reset(&mut self) -> Result<(), TransportError>;

    /// Power-cycle the USB port the device sits on
    fn cycle_port(&mut self) -> Result<(), TransportError>;

    /// Write raw bytes, returning how many were accepted
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Read up to `buf.len()` bytes, returning how many arrived
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Number of bytes waiting in the receive queue
    fn rx_queue_len(&mut self) -> Result<usize, TransportError>;

    /// Select the bit mode with the given pin direction mask
    fn set_bit_mode(&mut self, mask: u8, mode: BitMode) -> Result<(), TransportError>;

    /// Set read and write timeouts in milliseconds
    fn set_timeouts(&mut self, read_ms: u32, write_ms: u32) -> Result<(), TransportError>;

    /// Set the latency timer in milliseconds
    fn set_latency_timer(&mut self, ms: u8) -> Result<(), TransportError>;

    /// Set the USB IN transfer size in bytes
    fn set_transfer_size(&mut self, bytes: u32) -> Result<(), TransportError>;

    /// Configure event/error characters
    fn set_special_characters(&mut self, chars: SpecialCharacters)
        -> Result<(), TransportError>;

    /// List attached devices
    fn enumerate(&mut self) -> Result<DeviceList, TransportError>;

    /// Instantaneous state of the low GPIO byte
    fn pin_states(&mut self) -> Result<u8, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn open(&mut self, index: u32) -> Result<(), TransportError> {
        (**self).open(index)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        (**self).close()
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        (**self).reset()
    }

    fn cycle_port(&mut self) -> Result<(), TransportError> {
        (**self).cycle_port()
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        (**self).write(data)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        (**self).read(buf)
    }

    fn rx_queue_len(&mut self) -> Result<usize, TransportError> {
        (**self).rx_queue_len()
    }

    fn set_bit_mode(&mut self, mask: u8, mode: BitMode) -> Result<(), TransportError> {
        (**self).set_bit_mode(mask, mode)
    }

    fn set_timeouts(&mut self, read_ms: u32, write_ms: u32) -> Result<(), TransportError> {
        (**self).set_timeouts(read_ms, write_ms)
    }

    fn set_latency_timer(&mut self, ms: u8) -> Result<(), TransportError> {
        (**self).set_latency_timer(ms)
    }

    fn set_transfer_size(&mut self, bytes: u32) -> Result<(), TransportError> {
        (**self).set_transfer_size(bytes)
    }

    fn set_special_characters(
        &mut self,
        chars: SpecialCharacters,
    ) -> Result<(), TransportError> {
        (**self).set_special_characters(chars)
    }

    fn enumerate(&mut self) -> Result<DeviceList, TransportError> {
        (**self).enumerate()
    }

    fn pin_states(&mut self) -> Result<u8, TransportError> {
        (**self).pin_states()
    }
}
