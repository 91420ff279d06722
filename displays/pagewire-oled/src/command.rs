//! SSD1306/SH1106 command vocabulary and frame builders

use heapless::Vec;

use crate::config::ScreenConfig;

/// Controller commands
pub mod cmd {
    pub const DISPLAY_OFF: u8 = 0xAE;
    pub const DISPLAY_ON: u8 = 0xAF;
    pub const SET_DISPLAY_CLOCK_DIV: u8 = 0xD5;
    pub const SET_MULTIPLEX: u8 = 0xA8;
    pub const SET_DISPLAY_OFFSET: u8 = 0xD3;
    pub const SET_START_LINE: u8 = 0x40;
    pub const CHARGE_PUMP: u8 = 0x8D;
    pub const MEMORY_MODE: u8 = 0x20;
    pub const SEG_REMAP: u8 = 0xA0;
    pub const COM_SCAN_DEC: u8 = 0xC8;
    pub const SET_COM_PINS: u8 = 0xDA;
    pub const SET_CONTRAST: u8 = 0x81;
    pub const SET_PRECHARGE: u8 = 0xD9;
    pub const SET_VCOM_DETECT: u8 = 0xDB;
    pub const DISPLAY_ALL_ON_RESUME: u8 = 0xA4;
    pub const NORMAL_DISPLAY: u8 = 0xA6;
    pub const INVERSE_DISPLAY: u8 = 0xA7;
    pub const LOW_COL_ADDR: u8 = 0x00;
    pub const HIGH_COL_ADDR: u8 = 0x10;
    pub const SET_PAGE_ADDRESS: u8 = 0xB0;
}

/// Control byte: the rest of the frame is a command
pub const MODE_COMMAND: u8 = 0x00;

/// Control byte: the rest of the frame is display RAM data
pub const MODE_DATA: u8 = 0x40;

/// Largest data payload sent in one transaction
pub const MAX_DATA_CHUNK: usize = 64;

/// One data transaction: address, control byte, payload
pub type DataFrame = Vec<u8, { MAX_DATA_CHUNK + 2 }>;

/// Power-on register values, which differ with the VCC source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PowerProfile {
    charge_pump: u8,
    contrast: u8,
    precharge: u8,
}

impl PowerProfile {
    const fn for_vcc(external_vcc: bool) -> Self {
        if external_vcc {
            Self {
                charge_pump: 0x10,
                contrast: 0x9F,
                precharge: 0x22,
            }
        } else {
            Self {
                charge_pump: 0x14,
                contrast: 0xCF,
                precharge: 0xF1,
            }
        }
    }
}

/// Bring-up command bytes, each to be sent as its own command frame
pub fn init_sequence(screen: &ScreenConfig, external_vcc: bool) -> Vec<u8, 32> {
    let power = PowerProfile::for_vcc(external_vcc);
    let bytes = [
        cmd::DISPLAY_OFF,
        cmd::SET_DISPLAY_CLOCK_DIV,
        0x80,
        cmd::SET_MULTIPLEX,
        screen.multiplex,
        cmd::SET_DISPLAY_OFFSET,
        0x00,
        cmd::SET_START_LINE,
        cmd::CHARGE_PUMP,
        power.charge_pump,
        cmd::MEMORY_MODE,
        0x00,
        cmd::SEG_REMAP | 0x01,
        cmd::COM_SCAN_DEC,
        cmd::SET_COM_PINS,
        screen.com_pins,
        cmd::SET_CONTRAST,
        power.contrast,
        cmd::SET_PRECHARGE,
        power.precharge,
        cmd::SET_VCOM_DETECT,
        0x40,
        cmd::DISPLAY_ALL_ON_RESUME,
        cmd::NORMAL_DISPLAY,
        cmd::DISPLAY_ON,
    ];
    Vec::from_slice(&bytes).unwrap_or_default()
}

/// `[address, 0x00, command]`
pub const fn command_frame(address: u8, command: u8) -> [u8; 3] {
    [address, MODE_COMMAND, command]
}

/// `[address, 0x40, payload...]`, payload truncated to [`MAX_DATA_CHUNK`]
pub fn data_frame(address: u8, payload: &[u8]) -> DataFrame {
    let mut frame = DataFrame::new();
    let take = payload.len().min(MAX_DATA_CHUNK);
    let _ = frame.extend_from_slice(&[address, MODE_DATA]);
    let _ = frame.extend_from_slice(&payload[..take]);
    frame
}

/// Page and column address commands for one RAM position
pub const fn go_coordinate(page: u8, column: u8) -> [u8; 3] {
    [
        cmd::SET_PAGE_ADDRESS | (page & 0x0F),
        cmd::LOW_COL_ADDR | (column & 0x0F),
        cmd::HIGH_COL_ADDR | (column >> 4),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ScreenConfig, SCREEN_CONFIGS};

    fn screen_128x64() -> ScreenConfig {
        SCREEN_CONFIGS[1]
    }

    #[test]
    fn test_init_sequence_external_vcc() {
        let seq = init_sequence(&screen_128x64(), true);
        assert_eq!(
            seq.as_slice(),
            &[
                0xAE, 0xD5, 0x80, 0xA8, 0x3F, 0xD3, 0x00, 0x40, 0x8D, 0x10, 0x20, 0x00, 0xA1,
                0xC8, 0xDA, 0x12, 0x81, 0x9F, 0xD9, 0x22, 0xDB, 0x40, 0xA4, 0xA6, 0xAF
            ]
        );
    }

    #[test]
    fn test_init_sequence_internal_vcc() {
        let seq = init_sequence(&screen_128x64(), false);
        assert_eq!(seq[9], 0x14);
        assert_eq!(seq[17], 0xCF);
        assert_eq!(seq[19], 0xF1);
    }

    #[test]
    fn test_go_coordinate() {
        assert_eq!(go_coordinate(0, 0), [0xB0, 0x00, 0x10]);
        assert_eq!(go_coordinate(3, 0x82), [0xB3, 0x02, 0x18]);
    }

    #[test]
    fn test_data_frame_truncates() {
        let payload = [0xFFu8; 100];
        let frame = data_frame(0x3C, &payload);
        assert_eq!(frame.len(), MAX_DATA_CHUNK + 2);
        assert_eq!(&frame[..2], &[0x3C, 0x40]);
    }
}
