//! Synchronous I2C master on top of a [`Transport`]
//!
//! Every operation is a blocking round trip through the bridge. Callers that
//! share a bus go through [`crate::Bridge`], which serializes access.

use core::ops::{Deref, DerefMut};

use heapless::Vec;
use log::{debug, info, trace, warn};
use pagewire_hal::{BitMode, DeviceInfo, DeviceList, SpecialCharacters, Transport, TransportError};

use crate::config::BridgeConfig;
use crate::error::BusError;
use crate::mpsse::{self, op, SYNC_PROBES};

/// USB IN transfer size requested at bring-up
const TRANSFER_SIZE: u32 = 65_536;

/// Read/write timeout requested at bring-up
const TRANSPORT_TIMEOUT_MS: u32 = 5000;

/// Latency timer requested at bring-up
const LATENCY_MS: u8 = 16;

/// Highest address probed by [`I2cBus::scan`] (exclusive)
const SCAN_END: u8 = 127;

/// Scan result
pub type ScanResult = Vec<u8, 128>;

/// Anything that can carry a complete write transaction
///
/// The first byte is the 7-bit slave address, the rest is payload.
pub trait TransactionSink {
    /// Send one start/address/payload/stop transaction
    fn send_transaction(&mut self, bytes: &[u8]) -> Result<(), BusError>;
}

impl<S: TransactionSink + ?Sized> TransactionSink for &mut S {
    fn send_transaction(&mut self, bytes: &[u8]) -> Result<(), BusError> {
        (**self).send_transaction(bytes)
    }
}

/// I2C master engine
pub struct I2cBus<T: Transport> {
    transport: T,
    config: BridgeConfig,
    open: bool,
}

impl<T: Transport> I2cBus<T> {
    /// Create a closed bus; call [`I2cBus::setup`] before use
    pub fn new(transport: T, config: BridgeConfig) -> Self {
        Self {
            transport,
            config,
            open: false,
        }
    }

    /// Session configuration
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Underlying transport, mutably
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Give the transport back
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Handle open and MPSSE synchronized
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Open the device, enter MPSSE mode and verify synchronization
    ///
    /// Any failure leaves the handle closed. Not retried here; the reconnect
    /// tick calls this again on its next pass.
    pub fn setup(&mut self) -> Result<(), BusError> {
        self.open = false;
        let result = self.bring_up();
        if let Err(e) = result {
            warn!("Bridge setup failed: {}", e);
            let _ = self.transport.close();
            self.open = false;
        }
        result
    }

    fn bring_up(&mut self) -> Result<(), BusError> {
        let index = self.config.device_index;
        debug!("Opening bridge device {}", index);

        self.transport.open(index)?;
        self.transport.reset()?;
        self.drain_receive()?;
        self.transport.set_transfer_size(TRANSFER_SIZE)?;
        self.transport
            .set_special_characters(SpecialCharacters::DISABLED)?;
        self.transport
            .set_timeouts(TRANSPORT_TIMEOUT_MS, TRANSPORT_TIMEOUT_MS)?;
        self.transport.set_latency_timer(LATENCY_MS)?;
        self.transport.set_bit_mode(0x00, BitMode::Reset)?;
        self.transport.set_bit_mode(0x00, BitMode::Mpsse)?;
        self.write_all(&mpsse::SETUP_PINS)?;

        self.write_all(&[op::LOOPBACK_ON])?;
        if self.transport.rx_queue_len()? != 0 {
            return Err(BusError::ReceiveNotEmpty);
        }
        for probe in SYNC_PROBES {
            self.sync_round(probe)?;
        }
        trace!("MPSSE synchronized");

        self.write_all(&[op::LOOPBACK_OFF])?;
        self.write_all(&mpsse::CONFIGURE_CLOCKING)?;
        self.write_all(&mpsse::clock_divisor(self.config.clock_divisor))?;

        self.open = true;
        self.set_idle()?;
        info!(
            "Bridge {} ready, SCL {} Hz",
            index,
            mpsse::scl_frequency(self.config.clock_divisor)
        );
        Ok(())
    }

    /// Send a bogus opcode and wait for the `0xFA, probe` echo
    fn sync_round(&mut self, probe: u8) -> Result<(), BusError> {
        self.write_all(&[probe])?;
        let available = match self.wait_for_rx(self.config.poll.sync) {
            Ok(n) => n,
            Err(BusError::Timeout) => return Err(BusError::SyncFailed { probe }),
            Err(e) => return Err(e),
        };

        let mut buf = [0u8; 64];
        let want = available.min(buf.len());
        let got = self.transport.read(&mut buf[..want])?;
        if mpsse::contains_echo(&buf[..got], probe) {
            Ok(())
        } else {
            Err(BusError::SyncFailed { probe })
        }
    }

    /// Leave MPSSE mode and close the handle
    ///
    /// An already-invalid handle counts as closed.
    pub fn shutdown(&mut self) -> Result<(), BusError> {
        self.open = false;
        let _ = self.transport.set_bit_mode(0x00, BitMode::Reset);
        match self.transport.close() {
            Ok(()) | Err(TransportError::InvalidHandle) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Release SCL/SDA and switch the activity LED off
    pub fn set_idle(&mut self) -> Result<(), BusError> {
        self.ensure_open()?;
        let direction = mpsse::idle_direction(self.config.gpio_mask);
        self.write_all(&mpsse::idle(direction))
    }

    /// Issue a start condition
    ///
    /// The returned guard issues the matching stop when dropped.
    pub fn start(&mut self) -> Result<Started<'_, T>, BusError> {
        self.ensure_open()?;
        self.write_all(&mpsse::start())?;
        Ok(Started {
            bus: self,
            stopped: false,
        })
    }

    /// Issue a stop condition
    pub fn stop(&mut self) -> Result<(), BusError> {
        self.ensure_open()?;
        self.write_all(&mpsse::stop())
    }

    /// Send the address byte and check the slave acknowledged it
    ///
    /// The ACK sample is read directly, bounded only by the transport's read
    /// timeout.
    pub fn send_address_and_check_ack(&mut self, address: u8, read: bool) -> Result<(), BusError> {
        self.write_all(&mpsse::write_byte(mpsse::address_byte(address, read)))?;

        let mut sample = [0u8; 1];
        match self.transport.read(&mut sample) {
            Ok(1) if mpsse::is_ack(sample[0]) => Ok(()),
            Ok(1) => Err(BusError::Nack),
            _ => Err(BusError::NoResponse),
        }
    }

    /// Send one data byte and check the slave acknowledged it
    pub fn send_byte_and_check_ack(&mut self, byte: u8) -> Result<(), BusError> {
        self.write_all(&mpsse::write_byte(byte))?;
        self.wait_for_rx(self.config.poll.ack)?;

        let sample = self.read_one()?;
        if mpsse::is_ack(sample) {
            Ok(())
        } else {
            Err(BusError::Nack)
        }
    }

    /// Send one data byte without looking at the ACK bit
    ///
    /// The ACK sample is still clocked in; whatever arrives is consumed so
    /// it cannot be mistaken for a later reply.
    pub fn send_byte(&mut self, byte: u8) -> Result<(), BusError> {
        self.write_all(&mpsse::write_byte(byte))?;
        if self.wait_for_rx(self.config.poll.ack).is_ok() {
            let _ = self.read_one();
        }
        Ok(())
    }

    /// Clock a byte in and answer NAK (last byte of a read)
    pub fn read_byte_and_send_nak(&mut self) -> Result<u8, BusError> {
        self.read_byte(false)
    }

    /// Clock a byte in and answer ACK (more bytes follow)
    pub fn read_byte_and_send_ack(&mut self) -> Result<u8, BusError> {
        self.read_byte(true)
    }

    fn read_byte(&mut self, ack: bool) -> Result<u8, BusError> {
        self.write_all(&mpsse::read_byte(ack))?;
        self.wait_for_rx(self.config.poll.read_byte)?;
        self.read_one()
    }

    /// Write `bytes[1..]` to the slave at 7-bit address `bytes[0]`
    ///
    /// On failure the bus is stopped, shut down and brought up again before
    /// the error is returned. An empty slice does nothing.
    pub fn send_transaction(&mut self, bytes: &[u8]) -> Result<(), BusError> {
        let Some((&address, payload)) = bytes.split_first() else {
            return Ok(());
        };
        self.ensure_open()?;

        let result = self.write_frame(address, payload);
        if let Err(e) = result {
            warn!("I2C write to 0x{:02X} failed: {}", address, e);
            self.recover();
        }
        result
    }

    fn write_frame(&mut self, address: u8, payload: &[u8]) -> Result<(), BusError> {
        self.set_idle().map_err(|e| e.at(0))?;
        let mut bus = self.start().map_err(|e| e.at(0))?;
        bus.send_address_and_check_ack(address, false)
            .map_err(|e| e.at(0))?;
        for (i, &byte) in payload.iter().enumerate() {
            bus.send_byte_and_check_ack(byte).map_err(|e| e.at(i + 1))?;
        }
        bus.finish().map_err(|e| e.at(payload.len()))
    }

    /// Read `buf.len()` bytes from the slave at `address`
    ///
    /// Every byte but the last is acknowledged. Failure recovery matches
    /// [`I2cBus::send_transaction`].
    pub fn read_from(&mut self, address: u8, buf: &mut [u8]) -> Result<(), BusError> {
        if buf.is_empty() {
            return Ok(());
        }
        self.ensure_open()?;

        let result = self.read_frame(address, buf);
        if let Err(e) = result {
            warn!("I2C read from 0x{:02X} failed: {}", address, e);
            self.recover();
        }
        result
    }

    fn read_frame(&mut self, address: u8, buf: &mut [u8]) -> Result<(), BusError> {
        self.set_idle().map_err(|e| e.at(0))?;
        let mut bus = self.start().map_err(|e| e.at(0))?;
        bus.send_address_and_check_ack(address, true)
            .map_err(|e| e.at(0))?;
        let last = buf.len() - 1;
        for (i, slot) in buf.iter_mut().enumerate() {
            *slot = bus.read_byte(i < last).map_err(|e| e.at(i + 1))?;
        }
        bus.finish().map_err(|e| e.at(last + 1))
    }

    /// Protocol-level reset after a failed transfer
    ///
    /// A failing setup leaves the bus closed; the reconnect tick notices and
    /// drops the session to unready.
    pub(crate) fn recover(&mut self) {
        let _ = self.shutdown();
        if self.setup().is_err() {
            warn!("Bus recovery failed, waiting for reconnect");
        }
    }

    /// Probe every address and return the ones that acknowledge
    pub fn scan(&mut self) -> Result<ScanResult, BusError> {
        self.ensure_open()?;
        let mut found = ScanResult::new();

        for address in 0..SCAN_END {
            self.set_idle()?;
            let mut bus = self.start()?;
            let answered = bus.send_address_and_check_ack(address, false).is_ok();
            bus.finish()?;
            if answered {
                let _ = found.push(address);
            }
        }

        match found.len() {
            0 => info!("No I2C devices found"),
            1 => info!("One device found at 0x{:02X}", found[0]),
            n => info!("{} devices found", n),
        }
        Ok(found)
    }

    /// Read the GPIO pins and test them against `mask`
    pub fn pin_status(&mut self, mask: u8) -> Result<bool, BusError> {
        self.set_idle()?;
        let state = self.transport.pin_states()?;
        Ok(state & mask != 0)
    }

    /// List attached bridge devices
    pub fn enumerate(&mut self) -> Result<DeviceList, BusError> {
        Ok(self.transport.enumerate()?)
    }

    /// Entry at `index` of the device list, if present
    pub fn device_at(&mut self, index: u32) -> Result<Option<DeviceInfo>, BusError> {
        let devices = self.enumerate()?;
        Ok(devices.into_iter().nth(index as usize))
    }

    /// Device list entry whose location id is `location_id`
    ///
    /// When several entries share the id the last one wins.
    pub fn device_by_location(
        &mut self,
        location_id: u32,
    ) -> Result<Option<DeviceInfo>, BusError> {
        let devices = self.enumerate()?;
        Ok(devices
            .into_iter()
            .filter(|d| d.location_id == location_id)
            .last())
    }

    /// Power-cycle the port and drop the stale handle
    ///
    /// The handle is closed whether or not the cycle succeeded.
    pub(crate) fn cycle_port(&mut self) -> Result<(), BusError> {
        self.open = false;
        let cycled = self.transport.cycle_port();
        let closed = match self.transport.close() {
            Ok(()) | Err(TransportError::InvalidHandle) => Ok(()),
            Err(e) => Err(e),
        };
        cycled?;
        Ok(closed?)
    }

    fn ensure_open(&self) -> Result<(), BusError> {
        if self.open {
            Ok(())
        } else {
            Err(BusError::NotOpen)
        }
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), BusError> {
        let written = self.transport.write(data)?;
        if written != data.len() {
            return Err(TransportError::Io.into());
        }
        Ok(())
    }

    fn read_one(&mut self) -> Result<u8, BusError> {
        let mut byte = [0u8; 1];
        match self.transport.read(&mut byte)? {
            0 => Err(BusError::Timeout),
            _ => Ok(byte[0]),
        }
    }

    /// Poll the receive queue until something arrives or `budget` runs out
    fn wait_for_rx(&mut self, budget: u32) -> Result<usize, BusError> {
        for _ in 0..budget {
            let available = self.transport.rx_queue_len()?;
            if available > 0 {
                return Ok(available);
            }
        }
        Err(BusError::Timeout)
    }

    fn drain_receive(&mut self) -> Result<(), BusError> {
        let mut scratch = [0u8; 64];
        loop {
            let pending = self.transport.rx_queue_len()?;
            if pending == 0 {
                return Ok(());
            }
            let want = pending.min(scratch.len());
            if self.transport.read(&mut scratch[..want])? == 0 {
                return Ok(());
            }
        }
    }
}

impl<T: Transport> TransactionSink for I2cBus<T> {
    fn send_transaction(&mut self, bytes: &[u8]) -> Result<(), BusError> {
        I2cBus::send_transaction(self, bytes)
    }
}

/// A bus with a start condition outstanding
///
/// Dropping the guard issues the stop condition, so every start is paired
/// with exactly one stop whichever way the caller leaves.
pub struct Started<'a, T: Transport> {
    bus: &'a mut I2cBus<T>,
    stopped: bool,
}

impl<T: Transport> Started<'_, T> {
    /// Issue the stop condition now and report its result
    pub fn finish(mut self) -> Result<(), BusError> {
        self.stopped = true;
        self.bus.stop()
    }

    /// Repeated start without releasing the bus
    pub fn restart(&mut self) -> Result<(), BusError> {
        self.bus.write_all(&mpsse::repeated_start())
    }
}

impl<T: Transport> Deref for Started<'_, T> {
    type Target = I2cBus<T>;

    fn deref(&self) -> &Self::Target {
        self.bus
    }
}

impl<T: Transport> DerefMut for Started<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.bus
    }
}

impl<T: Transport> Drop for Started<'_, T> {
    fn drop(&mut self) {
        if !self.stopped {
            if let Err(e) = self.bus.stop() {
                warn!("Stop condition failed: {}", e);
            }
        }
    }
}
