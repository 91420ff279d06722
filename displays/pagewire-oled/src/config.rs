//! Display configuration
//!
//! `[display]` table of `pagewire.toml` plus the per-resolution controller
//! parameters the panel needs at bring-up.

use log::{debug, info};
use pagewire_i2c::ConfigError;
use serde::Deserialize;

/// Controller chip
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(rename_all = "lowercase")]
pub enum Controller {
    #[default]
    Ssd1306,
    /// 132-column RAM behind a 128-pixel panel
    Sh1106,
}

impl Controller {
    /// Column offset into display RAM
    pub const fn column_offset(self) -> u8 {
        match self {
            Controller::Ssd1306 => 0,
            Controller::Sh1106 => 2,
        }
    }
}

/// Resolution-dependent bring-up parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScreenConfig {
    pub width: u8,
    pub height: u8,
    /// Multiplex ratio (rows - 1)
    pub multiplex: u8,
    /// COM pin hardware configuration
    pub com_pins: u8,
    /// Extra column offset on top of the controller's
    pub col_offset: u8,
}

/// Known panel resolutions; the first entry is the fallback
pub const SCREEN_CONFIGS: [ScreenConfig; 4] = [
    ScreenConfig {
        width: 128,
        height: 32,
        multiplex: 0x1F,
        com_pins: 0x02,
        col_offset: 0,
    },
    ScreenConfig {
        width: 128,
        height: 64,
        multiplex: 0x3F,
        com_pins: 0x12,
        col_offset: 0,
    },
    ScreenConfig {
        width: 132,
        height: 64,
        multiplex: 0x3F,
        com_pins: 0x12,
        col_offset: 0,
    },
    ScreenConfig {
        width: 96,
        height: 16,
        multiplex: 0x0F,
        com_pins: 0x02,
        col_offset: 0,
    },
];

impl ScreenConfig {
    /// Parameters for a `width`x`height` panel
    ///
    /// Unknown resolutions fall back to the first table entry.
    pub fn lookup(width: u8, height: u8) -> Self {
        match SCREEN_CONFIGS
            .iter()
            .find(|c| c.width == width && c.height == height)
        {
            Some(config) => {
                debug!("Found matching screen config {}x{}", width, height);
                *config
            }
            None => {
                info!("No screen config for {}x{}, using defaults", width, height);
                SCREEN_CONFIGS[0]
            }
        }
    }
}

/// Page address field is four bits wide
const MAX_PAGES: u8 = 16;

/// Panel configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(default)]
pub struct DisplayConfig {
    /// 7-bit I2C address
    pub address: u8,
    /// Width in pixels
    pub width: u8,
    /// Height in pixels (multiple of 8)
    pub height: u8,
    pub controller: Controller,
    /// Extra pixels between text lines
    pub line_spacing: u8,
    /// Extra pixels between glyphs
    pub letter_spacing: u8,
    /// Panel powered from an external VCC rather than the charge pump
    pub external_vcc: bool,
    /// More than `buffer_len / dirty_divisor` dirty bytes means a full refresh
    pub dirty_divisor: u16,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            address: 0x3C,
            width: 128,
            height: 32,
            controller: Controller::Ssd1306,
            line_spacing: 1,
            letter_spacing: 1,
            external_vcc: true,
            dirty_divisor: 7,
        }
    }
}

#[derive(Deserialize)]
struct Document {
    #[serde(default)]
    display: DisplayConfig,
}

impl DisplayConfig {
    /// Parse the `[display]` table out of a full `pagewire.toml` document
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let doc: Document = toml::from_str(input)?;
        doc.display.validate()?;
        Ok(doc.display)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address > 0x7F {
            return Err(ConfigError::Invalid("address must be a 7-bit value"));
        }
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::Invalid("width and height must be > 0"));
        }
        if self.height % 8 != 0 {
            return Err(ConfigError::Invalid("height must be a multiple of 8"));
        }
        if self.pages() > MAX_PAGES {
            return Err(ConfigError::Invalid("height must be at most 128"));
        }
        // Column addresses are a single byte including the controller offset
        if self.width as u16 + self.controller.column_offset() as u16 > u8::MAX as u16 {
            return Err(ConfigError::Invalid("width plus column offset must fit in 255"));
        }
        if self.dirty_divisor == 0 {
            return Err(ConfigError::Invalid("dirty_divisor must be > 0"));
        }
        Ok(())
    }

    /// Framebuffer size in bytes
    pub fn buffer_len(&self) -> usize {
        self.width as usize * self.height as usize / 8
    }

    /// Number of 8-row pages
    pub fn pages(&self) -> u8 {
        self.height / 8
    }
}
