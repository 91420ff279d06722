//! `embedded-hal` 1.0 I2C master on [`I2cBus`]
//!
//! Lets any embedded-hal peripheral driver run against the bridge. Adjacent
//! operations of the same direction are merged; a direction change issues a
//! repeated start and a fresh address byte.

use embedded_hal::i2c::{ErrorType, I2c, Operation, SevenBitAddress};
use log::warn;
use pagewire_hal::Transport;

use crate::bus::I2cBus;
use crate::error::BusError;

impl<T: Transport> ErrorType for I2cBus<T> {
    type Error = BusError;
}

impl<T: Transport> I2c<SevenBitAddress> for I2cBus<T> {
    fn transaction(
        &mut self,
        address: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        if operations.is_empty() {
            return Ok(());
        }
        if !self.is_open() {
            return Err(BusError::NotOpen);
        }

        let result = run_operations(self, address, operations);
        if let Err(e) = result {
            warn!("I2C transaction with 0x{:02X} failed: {}", address, e);
            self.recover();
        }
        result
    }
}

fn is_read(operation: &Operation<'_>) -> bool {
    matches!(operation, Operation::Read(_))
}

fn run_operations<T: Transport>(
    bus: &mut I2cBus<T>,
    address: u8,
    operations: &mut [Operation<'_>],
) -> Result<(), BusError> {
    bus.set_idle().map_err(|e| e.at(0))?;
    let mut bus = bus.start().map_err(|e| e.at(0))?;

    let mut index = 0;
    let mut previous: Option<bool> = None;
    let count = operations.len();

    for n in 0..count {
        let read = is_read(&operations[n]);
        let next_is_read = operations.get(n + 1).map(is_read);

        if previous != Some(read) {
            if previous.is_some() {
                bus.restart().map_err(|e| e.at(index))?;
            }
            bus.send_address_and_check_ack(address, read)
                .map_err(|e| e.at(index))?;
            index += 1;
        }
        previous = Some(read);

        match &mut operations[n] {
            Operation::Write(data) => {
                for &byte in data.iter() {
                    bus.send_byte_and_check_ack(byte)
                        .map_err(|e| e.at(index))?;
                    index += 1;
                }
            }
            Operation::Read(buf) => {
                let last = buf.len();
                for (i, slot) in buf.iter_mut().enumerate() {
                    // NAK only the final byte of a run of reads
                    let ack = i + 1 < last || next_is_read == Some(true);
                    *slot = if ack {
                        bus.read_byte_and_send_ack()
                    } else {
                        bus.read_byte_and_send_nak()
                    }
                    .map_err(|e| e.at(index))?;
                    index += 1;
                }
            }
        }
    }

    bus.finish().map_err(|e| e.at(index))
}
