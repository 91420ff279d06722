//! MPSSE command vocabulary
//!
//! Byte sequences understood by the bridge chip's Multi-Protocol Synchronous
//! Serial Engine. These values are a wire contract with the silicon and must
//! go out exactly as written here.
//!
//! # Pin map (low port, AD0..AD7)
//!
//! - AD0: SCL
//! - AD1: SDA out
//! - AD2: SDA in (wired to AD1)
//! - AD3..AD7: user GPIO
//!
//! The high port (AC0..AC7) only drives AC6, an active-low activity LED.

use heapless::Vec;

/// MPSSE opcodes
pub mod op {
    /// Set low port value and direction (2 bytes follow)
    pub const SET_LOW: u8 = 0x80;
    /// Set high port value and direction (2 bytes follow)
    pub const SET_HIGH: u8 = 0x82;
    /// Clock bytes out, MSB first, on the falling edge
    pub const BYTES_OUT_MSB_FALLING: u8 = 0x11;
    /// Clock bits out, MSB first, on the falling edge
    pub const BITS_OUT_MSB_FALLING: u8 = 0x13;
    /// Clock bytes in, MSB first, on the rising edge
    pub const BYTES_IN_MSB_RISING: u8 = 0x20;
    /// Clock bits in, MSB first, on the rising edge
    pub const BITS_IN_MSB_RISING: u8 = 0x22;
    /// Connect TDI/DO to TDO/DI internally
    pub const LOOPBACK_ON: u8 = 0x84;
    /// Disconnect the internal loopback
    pub const LOOPBACK_OFF: u8 = 0x85;
    /// Set the clock divisor (2 bytes follow, little-endian)
    pub const SET_DIVISOR: u8 = 0x86;
    /// Flush results back to the host immediately
    pub const SEND_IMMEDIATE: u8 = 0x87;
    /// Use the 60 MHz master clock directly
    pub const DISABLE_DIV_BY_5: u8 = 0x8A;
    /// Data valid on both clock edges, as I2C needs
    pub const ENABLE_3_PHASE: u8 = 0x8C;
    /// No RTCK-driven clocking
    pub const DISABLE_ADAPTIVE: u8 = 0x97;
    /// Open-drain emulation on the selected pins (2 mask bytes follow)
    pub const DRIVE_ZERO: u8 = 0x9E;
    /// Prefix the chip sends back after an unknown opcode
    pub const BAD_COMMAND: u8 = 0xFA;
}

/// Low/high port line states
pub mod line {
    /// Idle: SCL and SDA released high, AD3/AD4 high
    pub const IDLE_VALUE: u8 = 0x1B;
    /// Between bytes: SCL low, SDA released
    pub const TRANSFER_VALUE: u8 = 0x1A;
    /// Between bytes: everything out except AD2 (SDA in) and AD6/AD7
    pub const TRANSFER_DIRECTION: u8 = 0x3B;
    /// Start/stop: every pin out except AD2
    pub const CONDITION_DIRECTION: u8 = 0xFB;
    /// SCL high, SDA low
    pub const SDA_LOW: u8 = 0xFD;
    /// SCL low, SDA low
    pub const BOTH_LOW: u8 = 0xFC;
    /// SCL high, SDA high
    pub const BOTH_HIGH: u8 = 0xFF;
    /// SCL low, SDA released
    pub const SCL_LOW: u8 = 0xFE;
    /// Pin configuration written right after entering MPSSE mode
    pub const SETUP_DIRECTION: u8 = 0xBB;
    /// High port: only AC6 (LED) is an output
    pub const LED_DIRECTION: u8 = 0x40;
    /// High port: LED off (AC6 high)
    pub const LED_OFF: u8 = 0xFF;
    /// High port: LED on (AC6 low)
    pub const LED_ON: u8 = 0xBF;
    /// Pins reserved for I2C (AD0..AD2)
    pub const I2C_PINS: u8 = 0x07;
    /// SCL and SDA out
    pub const I2C_OUTPUTS: u8 = 0x03;
    /// AD6/AD7 are always outputs
    pub const DEFAULT_GPIO_OUTPUTS: u8 = 0xC0;
}

/// Each start/stop step is repeated to stretch it past the I2C minimum
/// setup and hold times.
pub const CONDITION_REPEATS: usize = 4;

/// Bogus opcodes used for the synchronization self-test
pub const SYNC_PROBES: [u8; 2] = [0xAA, 0xAB];

/// Capacity of a single command batch
pub const MAX_COMMAND_LEN: usize = 64;

/// A batch of MPSSE commands sent in one transport write
pub type Command = Vec<u8, MAX_COMMAND_LEN>;

/// Pin setup written right after entering MPSSE mode
pub const SETUP_PINS: [u8; 3] = [op::SET_LOW, 0x00, line::SETUP_DIRECTION];

/// Clocking configuration applied after a successful sync
pub const CONFIGURE_CLOCKING: [u8; 7] = [
    op::DISABLE_DIV_BY_5,
    op::DISABLE_ADAPTIVE,
    op::ENABLE_3_PHASE,
    op::DRIVE_ZERO,
    line::I2C_PINS,
    0x00,
    op::LOOPBACK_OFF,
];

/// Chained builder for MPSSE command batches
#[derive(Debug, Clone, Default)]
pub struct CommandBuilder {
    buf: Command,
}

impl CommandBuilder {
    /// Start an empty batch
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn push(mut self, bytes: &[u8]) -> Self {
        let pushed = self.buf.extend_from_slice(bytes);
        debug_assert!(pushed.is_ok(), "MPSSE command batch overflow");
        self
    }

    /// Set low port value and direction
    pub fn set_low(self, value: u8, direction: u8) -> Self {
        self.push(&[op::SET_LOW, value, direction])
    }

    /// Set high port value and direction
    pub fn set_high(self, value: u8, direction: u8) -> Self {
        self.push(&[op::SET_HIGH, value, direction])
    }

    /// Set the low port `count` times in a row
    pub fn hold_low(mut self, value: u8, direction: u8, count: usize) -> Self {
        for _ in 0..count {
            self = self.set_low(value, direction);
        }
        self
    }

    /// Clock one byte out (length field 0x0000 means one byte)
    pub fn clock_byte_out(self, byte: u8) -> Self {
        self.push(&[op::BYTES_OUT_MSB_FALLING, 0x00, 0x00, byte])
    }

    /// Clock one byte in
    pub fn clock_byte_in(self) -> Self {
        self.push(&[op::BYTES_IN_MSB_RISING, 0x00, 0x00])
    }

    /// Clock bit 7 of `bit` out (length field 0x00 means one bit)
    pub fn clock_bit_out(self, bit: u8) -> Self {
        self.push(&[op::BITS_OUT_MSB_FALLING, 0x00, bit])
    }

    /// Clock one bit in
    pub fn clock_bit_in(self) -> Self {
        self.push(&[op::BITS_IN_MSB_RISING, 0x00])
    }

    /// Return the lines to the between-bytes state
    pub fn release_data(self) -> Self {
        self.set_low(line::TRANSFER_VALUE, line::TRANSFER_DIRECTION)
    }

    /// Ask the chip to return gathered results now
    pub fn send_immediate(self) -> Self {
        self.push(&[op::SEND_IMMEDIATE])
    }

    /// Finish the batch
    pub fn build(self) -> Command {
        self.buf
    }
}

/// Low port direction byte for the idle state
///
/// `gpio_mask` selects which of AD3..AD7 are outputs; AD0..AD2 belong to
/// I2C and are forced by this function.
pub fn idle_direction(gpio_mask: u8) -> u8 {
    (gpio_mask & !line::I2C_PINS) | line::DEFAULT_GPIO_OUTPUTS | line::I2C_OUTPUTS
}

/// Release SCL and SDA and switch the activity LED off
pub fn idle(direction: u8) -> Command {
    CommandBuilder::new()
        .set_low(line::IDLE_VALUE, direction)
        .set_high(line::LED_OFF, line::LED_DIRECTION)
        .build()
}

/// Start condition: SDA falls while SCL is high, then SCL falls.
pub fn start() -> Command {
    CommandBuilder::new()
        .hold_low(line::SDA_LOW, line::CONDITION_DIRECTION, CONDITION_REPEATS)
        .hold_low(line::BOTH_LOW, line::CONDITION_DIRECTION, CONDITION_REPEATS)
        .set_high(line::LED_ON, line::LED_DIRECTION)
        .build()
}

/// Repeated start: release SDA with SCL low, raise SCL, then a normal start
pub fn repeated_start() -> Command {
    let mut cmd = CommandBuilder::new()
        .hold_low(line::SCL_LOW, line::CONDITION_DIRECTION, CONDITION_REPEATS)
        .hold_low(line::BOTH_HIGH, line::CONDITION_DIRECTION, CONDITION_REPEATS)
        .build();
    let appended = cmd.extend_from_slice(&start());
    debug_assert!(appended.is_ok(), "MPSSE command batch overflow");
    cmd
}

/// Stop condition: SCL rises while SDA is low, then SDA rises.
pub fn stop() -> Command {
    CommandBuilder::new()
        .hold_low(line::BOTH_LOW, line::CONDITION_DIRECTION, CONDITION_REPEATS)
        .hold_low(line::SDA_LOW, line::CONDITION_DIRECTION, CONDITION_REPEATS)
        .hold_low(line::BOTH_HIGH, line::CONDITION_DIRECTION, CONDITION_REPEATS)
        .set_high(line::LED_OFF, line::LED_DIRECTION)
        .build()
}

/// Clock a byte out and sample the slave's ACK bit
pub fn write_byte(byte: u8) -> Command {
    CommandBuilder::new()
        .clock_byte_out(byte)
        .release_data()
        .clock_bit_in()
        .send_immediate()
        .build()
}

/// Clock a byte in and answer with ACK (`ack = true`) or NAK
pub fn read_byte(ack: bool) -> Command {
    CommandBuilder::new()
        .clock_byte_in()
        .clock_bit_out(if ack { 0x00 } else { 0xFF })
        .release_data()
        .send_immediate()
        .build()
}

/// Address byte: 7-bit address in the top bits, R/W in bit 0
pub const fn address_byte(address: u8, read: bool) -> u8 {
    if read {
        (address << 1) | 0x01
    } else {
        (address << 1) & 0xFE
    }
}

/// Program the SCL divisor: SCL = 60 MHz / ((1 + divisor) * 2)
pub const fn clock_divisor(divisor: u16) -> [u8; 3] {
    [op::SET_DIVISOR, (divisor & 0xFF) as u8, (divisor >> 8) as u8]
}

/// SCL frequency in Hz for a divisor (divide-by-5 disabled)
pub const fn scl_frequency(divisor: u16) -> u32 {
    60_000_000 / ((1 + divisor as u32) * 2)
}

/// Check a receive buffer for the `{0xFA, probe}` echo of a bogus opcode
pub fn contains_echo(received: &[u8], probe: u8) -> bool {
    received
        .windows(2)
        .any(|pair| pair[0] == op::BAD_COMMAND && pair[1] == probe)
}

/// Slave acknowledged if bit 0 of the sampled byte is low
pub const fn is_ack(sample: u8) -> bool {
    sample & 0x01 == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_encoding() {
        assert_eq!(address_byte(0x50, false), 0xA0);
        assert_eq!(address_byte(0x50, true), 0xA1);
        assert_eq!(address_byte(0x3C, false), 0x78);
    }

    #[test]
    fn test_clock_divisor_bytes() {
        assert_eq!(clock_divisor(0xC8), [0x86, 0xC8, 0x00]);
        assert_eq!(clock_divisor(0x0132), [0x86, 0x32, 0x01]);
    }

    #[test]
    fn test_scl_frequency() {
        // 60 MHz / (201 * 2)
        assert_eq!(scl_frequency(0xC8), 149_253);
        assert_eq!(scl_frequency(0x12B), 100_000);
    }

    #[test]
    fn test_start_sequence() {
        let cmd = start();
        assert_eq!(cmd.len(), 2 * CONDITION_REPEATS * 3 + 3);
        assert_eq!(&cmd[..3], &[0x80, 0xFD, 0xFB]);
        assert_eq!(&cmd[12..15], &[0x80, 0xFC, 0xFB]);
        assert_eq!(&cmd[cmd.len() - 3..], &[0x82, 0xBF, 0x40]);
    }

    #[test]
    fn test_stop_sequence() {
        let cmd = stop();
        assert_eq!(cmd.len(), 3 * CONDITION_REPEATS * 3 + 3);
        assert_eq!(&cmd[..3], &[0x80, 0xFC, 0xFB]);
        assert_eq!(&cmd[12..15], &[0x80, 0xFD, 0xFB]);
        assert_eq!(&cmd[24..27], &[0x80, 0xFF, 0xFB]);
        assert_eq!(&cmd[cmd.len() - 3..], &[0x82, 0xFF, 0x40]);
    }

    #[test]
    fn test_write_byte_sequence() {
        assert_eq!(
            write_byte(0x5A).as_slice(),
            &[0x11, 0x00, 0x00, 0x5A, 0x80, 0x1A, 0x3B, 0x22, 0x00, 0x87]
        );
    }

    #[test]
    fn test_read_byte_sequence() {
        assert_eq!(
            read_byte(false).as_slice(),
            &[0x20, 0x00, 0x00, 0x13, 0x00, 0xFF, 0x80, 0x1A, 0x3B, 0x87]
        );
        assert_eq!(read_byte(true)[5], 0x00);
    }

    #[test]
    fn test_idle_direction_protects_i2c_pins() {
        // AD2 (SDA in) must stay an input whatever the caller asks for
        assert_eq!(idle_direction(0xFF) & 0x04, 0);
        assert_eq!(idle_direction(0x00), 0xC3);
        assert_eq!(idle_direction(0x18), 0xDB);
    }

    #[test]
    fn test_echo_detection() {
        assert!(contains_echo(&[0xFA, 0xAA], 0xAA));
        assert!(contains_echo(&[0x00, 0xFA, 0xAB], 0xAB));
        assert!(!contains_echo(&[0xFA, 0xAB], 0xAA));
        assert!(!contains_echo(&[0xFA], 0xAA));
        assert!(!contains_echo(&[], 0xAA));
    }
}
