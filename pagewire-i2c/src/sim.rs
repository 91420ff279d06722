//! Simulated bridge chip
//!
//! Decodes the MPSSE command stream the engine writes and answers the way
//! the silicon would: bogus opcodes are echoed as `0xFA, op`, ACK samples
//! come back according to which slave addresses are present, and byte reads
//! are served from a queue. Everything written is recorded so tests can
//! assert on exact wire traffic.

use std::collections::{BTreeSet, VecDeque};

use pagewire_hal::{
    BitMode, DeviceInfo, DeviceList, SpecialCharacters, Transport, TransportError,
};

use crate::mpsse::{line, op};

/// Operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SimOp {
    Open,
    Close,
    Reset,
    CyclePort,
    Write,
    Read,
    SetBitMode,
    Enumerate,
    PinStates,
}

/// Scripted MPSSE transport
#[derive(Debug)]
pub struct SimTransport {
    /// Devices reported by `enumerate`
    pub devices: DeviceList,
    /// 7-bit addresses that acknowledge
    pub present: BTreeSet<u8>,
    /// Bytes served to `0x20` reads (0xFF once empty)
    pub read_data: VecDeque<u8>,
    /// Raw low-port pin state returned by `pin_states`
    pub pins: u8,
    /// Answer unknown opcodes with `0xFA, op`
    pub echo_bad_commands: bool,
    /// Leave a junk byte in the receive queue when loopback is enabled
    pub junk_on_loopback: bool,
    /// NAK the byte at this position of every transaction (0 is the address)
    pub nack_at: Option<usize>,
    /// Never answer ACK samples at all
    pub silent: bool,

    writes: Vec<Vec<u8>>,
    rx: VecDeque<u8>,
    faults: BTreeSet<SimOp>,
    open: bool,
    mode: BitMode,
    loopback: bool,
    divisor: Option<u16>,
    active: bool,
    expect_address: bool,
    byte_index: usize,
    pending_ack: Option<bool>,
    starts: usize,
    restarts: usize,
    stops: usize,
    opens: usize,
    closes: usize,
    cycles: usize,
}

impl Default for SimTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SimTransport {
    /// No devices attached
    pub fn new() -> Self {
        Self {
            devices: DeviceList::new(),
            present: BTreeSet::new(),
            read_data: VecDeque::new(),
            pins: 0,
            echo_bad_commands: true,
            junk_on_loopback: false,
            nack_at: None,
            silent: false,
            writes: Vec::new(),
            rx: VecDeque::new(),
            faults: BTreeSet::new(),
            open: false,
            mode: BitMode::Reset,
            loopback: false,
            divisor: None,
            active: false,
            expect_address: false,
            byte_index: 0,
            pending_ack: None,
            starts: 0,
            restarts: 0,
            stops: 0,
            opens: 0,
            closes: 0,
            cycles: 0,
        }
    }

    /// One FT232H at a valid bus location, with the given slaves present
    pub fn with_device(addresses: &[u8]) -> Self {
        let mut sim = Self::new();
        sim.attach(0x21);
        sim.present.extend(addresses.iter().copied());
        sim
    }

    /// Plug a device in at `location_id`
    pub fn attach(&mut self, location_id: u32) {
        let _ = self
            .devices
            .push(DeviceInfo::new("Single RS232-HS", "FT5XYZ", 0x0403_6014, location_id));
    }

    /// Unplug every device
    pub fn detach_all(&mut self) {
        self.devices.clear();
    }

    /// Make `op` fail with an I/O error until [`SimTransport::clear_faults`]
    pub fn fail(&mut self, op: SimOp) {
        self.faults.insert(op);
    }

    /// Remove every injected failure
    pub fn clear_faults(&mut self) {
        self.faults.clear();
    }

    /// Every buffer passed to `write`, in order
    pub fn writes(&self) -> &[Vec<u8>] {
        &self.writes
    }

    /// All written bytes concatenated
    pub fn written_bytes(&self) -> Vec<u8> {
        self.writes.concat()
    }

    /// Forget recorded writes and condition counters
    pub fn clear_log(&mut self) {
        self.writes.clear();
        self.starts = 0;
        self.restarts = 0;
        self.stops = 0;
    }

    /// Handle currently open
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Loopback currently enabled
    pub fn loopback(&self) -> bool {
        self.loopback
    }

    /// Last programmed clock divisor
    pub fn divisor(&self) -> Option<u16> {
        self.divisor
    }

    /// Start conditions seen on an idle bus
    pub fn starts(&self) -> usize {
        self.starts
    }

    /// Start conditions seen while a transaction was already running
    pub fn restarts(&self) -> usize {
        self.restarts
    }

    /// Stop conditions seen
    pub fn stops(&self) -> usize {
        self.stops
    }

    /// Number of successful opens
    pub fn opens(&self) -> usize {
        self.opens
    }

    /// Number of close calls on an open handle
    pub fn closes(&self) -> usize {
        self.closes
    }

    /// Number of port cycles
    pub fn cycles(&self) -> usize {
        self.cycles
    }

    fn check(&self, op: SimOp) -> Result<(), TransportError> {
        if self.faults.contains(&op) {
            return Err(TransportError::Io);
        }
        Ok(())
    }

    fn check_open(&self, op: SimOp) -> Result<(), TransportError> {
        self.check(op)?;
        if !self.open {
            return Err(TransportError::DeviceNotOpened);
        }
        Ok(())
    }

    fn decode(&mut self, data: &[u8]) {
        let mut i = 0;
        while i < data.len() {
            let opcode = data[i];
            let args = &data[i + 1..];
            let used = match opcode {
                op::SET_LOW | op::SET_DIVISOR | op::DRIVE_ZERO | op::BITS_OUT_MSB_FALLING
                    if args.len() < 2 =>
                {
                    return;
                }
                op::SET_LOW => 3,
                op::SET_HIGH => {
                    let Some(&value) = args.first() else { return };
                    self.led(value);
                    3
                }
                op::SET_DIVISOR => {
                    self.divisor = Some(u16::from_le_bytes([args[0], args[1]]));
                    3
                }
                op::DRIVE_ZERO | op::BITS_OUT_MSB_FALLING => 3,
                op::BYTES_OUT_MSB_FALLING => {
                    if args.len() < 2 {
                        return;
                    }
                    let len = u16::from_le_bytes([args[0], args[1]]) as usize + 1;
                    let Some(payload) = args.get(2..2 + len) else { return };
                    for &byte in payload {
                        self.byte_out(byte);
                    }
                    3 + len
                }
                op::BYTES_IN_MSB_RISING => {
                    if args.len() < 2 {
                        return;
                    }
                    let len = u16::from_le_bytes([args[0], args[1]]) as usize + 1;
                    for _ in 0..len {
                        let byte = self.read_data.pop_front().unwrap_or(0xFF);
                        self.rx.push_back(byte);
                    }
                    3
                }
                op::BITS_IN_MSB_RISING => {
                    if let Some(ack) = self.pending_ack.take() {
                        if !self.silent {
                            self.rx.push_back(if ack { 0x00 } else { 0x01 });
                        }
                    }
                    2
                }
                op::LOOPBACK_ON => {
                    self.loopback = true;
                    if self.junk_on_loopback {
                        self.rx.push_back(0x00);
                    }
                    1
                }
                op::LOOPBACK_OFF => {
                    self.loopback = false;
                    1
                }
                op::DISABLE_DIV_BY_5
                | op::ENABLE_3_PHASE
                | op::DISABLE_ADAPTIVE
                | op::SEND_IMMEDIATE => 1,
                unknown => {
                    if self.echo_bad_commands {
                        self.rx.push_back(op::BAD_COMMAND);
                        self.rx.push_back(unknown);
                    }
                    1
                }
            };
            i += used;
        }
    }

    fn led(&mut self, value: u8) {
        match value {
            line::LED_ON if self.active => self.restarts += 1,
            line::LED_ON => {
                self.active = true;
                self.starts += 1;
            }
            line::LED_OFF if self.active => {
                self.active = false;
                self.stops += 1;
            }
            _ => return,
        }
        self.expect_address = self.active;
    }

    fn byte_out(&mut self, byte: u8) {
        if self.expect_address {
            self.expect_address = false;
            self.byte_index = 0;
            self.pending_ack = Some(self.present.contains(&(byte >> 1)) && self.nack_at != Some(0));
        } else {
            self.byte_index += 1;
            self.pending_ack = Some(self.nack_at != Some(self.byte_index));
        }
    }
}

impl Transport for SimTransport {
    fn open(&mut self, index: u32) -> Result<(), TransportError> {
        self.check(SimOp::Open)?;
        if index as usize >= self.devices.len() {
            return Err(TransportError::DeviceNotFound);
        }
        self.open = true;
        self.opens += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.check(SimOp::Close)?;
        if !self.open {
            return Err(TransportError::InvalidHandle);
        }
        self.open = false;
        self.closes += 1;
        self.mode = BitMode::Reset;
        self.loopback = false;
        self.rx.clear();
        Ok(())
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        self.check_open(SimOp::Reset)
    }

    fn cycle_port(&mut self) -> Result<(), TransportError> {
        self.check_open(SimOp::CyclePort)?;
        self.cycles += 1;
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        self.check_open(SimOp::Write)?;
        self.writes.push(data.to_vec());
        if self.mode == BitMode::Mpsse {
            self.decode(data);
        }
        Ok(data.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.check_open(SimOp::Read)?;
        let mut n = 0;
        while n < buf.len() {
            let Some(byte) = self.rx.pop_front() else { break };
            buf[n] = byte;
            n += 1;
        }
        Ok(n)
    }

    fn rx_queue_len(&mut self) -> Result<usize, TransportError> {
        self.check_open(SimOp::Read)?;
        Ok(self.rx.len())
    }

    fn set_bit_mode(&mut self, _mask: u8, mode: BitMode) -> Result<(), TransportError> {
        self.check_open(SimOp::SetBitMode)?;
        self.mode = mode;
        Ok(())
    }

    fn set_timeouts(&mut self, _read_ms: u32, _write_ms: u32) -> Result<(), TransportError> {
        self.check_open(SimOp::Write)
    }

    fn set_latency_timer(&mut self, _ms: u8) -> Result<(), TransportError> {
        self.check_open(SimOp::Write)
    }

    fn set_transfer_size(&mut self, _bytes: u32) -> Result<(), TransportError> {
        self.check_open(SimOp::Write)
    }

    fn set_special_characters(
        &mut self,
        _chars: SpecialCharacters,
    ) -> Result<(), TransportError> {
        self.check_open(SimOp::Write)
    }

    fn enumerate(&mut self) -> Result<DeviceList, TransportError> {
        self.check(SimOp::Enumerate)?;
        Ok(self.devices.clone())
    }

    fn pin_states(&mut self) -> Result<u8, TransportError> {
        self.check_open(SimOp::PinStates)?;
        Ok(self.pins)
    }
}
