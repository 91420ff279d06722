//! Bus error types

use core::fmt;

use pagewire_hal::TransportError;

/// I2C bus failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusError {
    /// The bridge driver reported a failure
    Transport(TransportError),
    /// Slave answered with NAK
    Nack,
    /// Nothing came back for the address byte
    NoResponse,
    /// Poll budget ran out before the chip returned data
    Timeout,
    /// The bogus-opcode echo never arrived during bring-up
    SyncFailed {
        /// Opcode that went unanswered
        probe: u8,
    },
    /// Stale bytes in the receive queue after enabling loopback
    ReceiveNotEmpty,
    /// Operation needs an open, synchronized bus
    NotOpen,
    /// A byte of a transaction failed; the bus has been reset
    Transaction {
        /// Position of the failing byte (0 is the address)
        index: usize,
        /// What went wrong at that byte
        cause: TransactionFault,
    },
}

/// Failure of a single byte inside a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransactionFault {
    /// Driver failure
    Transport(TransportError),
    /// NAK
    Nack,
    /// No answer
    NoResponse,
    /// Poll budget exhausted
    Timeout,
    /// Bus went away mid-transaction
    NotOpen,
}

impl BusError {
    /// Wrap this error with the index of the byte that caused it
    pub fn at(self, index: usize) -> Self {
        let cause = match self {
            BusError::Transport(e) => TransactionFault::Transport(e),
            BusError::Nack => TransactionFault::Nack,
            BusError::NoResponse => TransactionFault::NoResponse,
            BusError::Timeout => TransactionFault::Timeout,
            BusError::NotOpen => TransactionFault::NotOpen,
            // Setup-level failures cannot happen per byte
            other => return other,
        };
        BusError::Transaction { index, cause }
    }

    /// The slave actively refused a byte
    pub fn is_nack(&self) -> bool {
        matches!(
            self,
            BusError::Nack
                | BusError::Transaction {
                    cause: TransactionFault::Nack,
                    ..
                }
        )
    }
}

impl From<TransportError> for BusError {
    fn from(err: TransportError) -> Self {
        BusError::Transport(err)
    }
}

impl fmt::Display for TransactionFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionFault::Transport(e) => write!(f, "transport: {}", e),
            TransactionFault::Nack => f.write_str("NAK"),
            TransactionFault::NoResponse => f.write_str("no response"),
            TransactionFault::Timeout => f.write_str("timeout"),
            TransactionFault::NotOpen => f.write_str("bus not open"),
        }
    }
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::Transport(e) => write!(f, "transport error: {}", e),
            BusError::Nack => f.write_str("slave did not acknowledge"),
            BusError::NoResponse => f.write_str("no response from slave"),
            BusError::Timeout => f.write_str("timed out waiting for bridge"),
            BusError::SyncFailed { probe } => {
                write!(f, "MPSSE sync failed on probe 0x{:02X}", probe)
            }
            BusError::ReceiveNotEmpty => f.write_str("receive queue not empty after loopback"),
            BusError::NotOpen => f.write_str("bus not open"),
            BusError::Transaction { index, cause } => {
                write!(f, "transaction failed at byte {}: {}", index, cause)
            }
        }
    }
}

impl std::error::Error for BusError {}

impl embedded_hal::i2c::Error for BusError {
    fn kind(&self) -> embedded_hal::i2c::ErrorKind {
        use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};

        match self {
            BusError::Nack | BusError::NoResponse => {
                ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)
            }
            BusError::Transaction { index: 0, cause } => match cause {
                TransactionFault::Nack | TransactionFault::NoResponse => {
                    ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)
                }
                _ => ErrorKind::Other,
            },
            BusError::Transaction {
                cause: TransactionFault::Nack,
                ..
            } => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data),
            _ => ErrorKind::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::i2c::{Error, ErrorKind, NoAcknowledgeSource};

    #[test]
    fn test_at_wraps_byte_faults() {
        assert_eq!(
            BusError::Nack.at(3),
            BusError::Transaction {
                index: 3,
                cause: TransactionFault::Nack
            }
        );
        assert_eq!(
            BusError::SyncFailed { probe: 0xAA }.at(1),
            BusError::SyncFailed { probe: 0xAA }
        );
    }

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(
            BusError::Nack.at(0).kind(),
            ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)
        );
        assert_eq!(
            BusError::Nack.at(2).kind(),
            ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data)
        );
        assert_eq!(BusError::Timeout.at(2).kind(), ErrorKind::Other);
    }

    #[test]
    fn test_display() {
        let msg = std::format!("{}", BusError::Nack.at(4));
        assert_eq!(msg, "transaction failed at byte 4: NAK");
    }
}
