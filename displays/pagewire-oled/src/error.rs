//! Display error types

use core::fmt;

use pagewire_i2c::BusError;

/// Display synchronization failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DisplayError {
    /// Some transactions of a multi-transaction operation failed
    Communication {
        /// How many transactions failed
        failed: usize,
    },
    /// A single-transaction command failed
    Bus(BusError),
}

impl From<BusError> for DisplayError {
    fn from(err: BusError) -> Self {
        DisplayError::Bus(err)
    }
}

impl fmt::Display for DisplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayError::Communication { failed } => {
                write!(f, "{} display transaction(s) failed", failed)
            }
            DisplayError::Bus(e) => write!(f, "display command failed: {}", e),
        }
    }
}

impl std::error::Error for DisplayError {}
