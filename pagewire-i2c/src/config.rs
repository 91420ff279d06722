//! Bridge configuration
//!
//! Loaded from the `[bridge]` table of `pagewire.toml`. Every field is
//! optional; missing keys take the defaults below.
//!
//! ```toml
//! [bridge]
//! device_index = 0
//! gpio_mask = 0x00
//! clock_divisor = 0xC8
//! reconnect_interval_ms = 1000
//! button_poll_ms = 50
//!
//! [bridge.poll]
//! read_byte = 500
//! ack = 2500
//! sync = 5000
//! ```

use core::fmt;

use embassy_time::Duration;
use serde::Deserialize;

/// Default SCL divisor (about 149 kHz)
pub const DEFAULT_CLOCK_DIVISOR: u16 = 0xC8;

/// Default reconnect tick period
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 1000;

/// Default button poll period
pub const DEFAULT_BUTTON_POLL_MS: u64 = 50;

/// Configuration load failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The document is not valid TOML or has wrongly typed keys
    Parse(String),
    /// A value is out of range
    Invalid(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Parse(msg) => write!(f, "config parse error: {}", msg),
            ConfigError::Invalid(what) => write!(f, "invalid config: {}", what),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Parse(err.message().to_string())
    }
}

/// Poll budgets for the receive-queue wait loops
///
/// Each unit is one `rx_queue_len` call; the transport's own read timeout
/// still applies underneath.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(default)]
pub struct PollBudget {
    /// Waiting for a byte clocked in from the slave
    pub read_byte: u32,
    /// Waiting for the ACK bit after a data byte
    pub ack: u32,
    /// Waiting for the bogus-opcode echo during bring-up
    pub sync: u32,
}

impl Default for PollBudget {
    fn default() -> Self {
        Self {
            read_byte: 500,
            ack: 2500,
            sync: 5000,
        }
    }
}

/// Bridge session configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(default)]
pub struct BridgeConfig {
    /// Index into the driver's device list
    pub device_index: u32,
    /// Direction mask for AD3..AD7 (1 = output); AD0..AD2 are ignored
    pub gpio_mask: u8,
    /// SCL divisor
    pub clock_divisor: u16,
    /// Reconnect tick period
    pub reconnect_interval_ms: u64,
    /// Button poll period
    pub button_poll_ms: u64,
    /// Poll budgets
    pub poll: PollBudget,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            gpio_mask: 0x00,
            clock_divisor: DEFAULT_CLOCK_DIVISOR,
            reconnect_interval_ms: DEFAULT_RECONNECT_INTERVAL_MS,
            button_poll_ms: DEFAULT_BUTTON_POLL_MS,
            poll: PollBudget::default(),
        }
    }
}

#[derive(Deserialize)]
struct Document {
    #[serde(default)]
    bridge: BridgeConfig,
}

impl BridgeConfig {
    /// Parse the `[bridge]` table out of a full `pagewire.toml` document
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let doc: Document = toml::from_str(input)?;
        doc.bridge.validate()?;
        Ok(doc.bridge)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reconnect_interval_ms == 0 {
            return Err(ConfigError::Invalid("reconnect_interval_ms must be > 0"));
        }
        if self.button_poll_ms == 0 {
            return Err(ConfigError::Invalid("button_poll_ms must be > 0"));
        }
        if self.poll.read_byte == 0 || self.poll.ack == 0 || self.poll.sync == 0 {
            return Err(ConfigError::Invalid("poll budgets must be > 0"));
        }
        Ok(())
    }

    /// Reconnect tick period
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    /// Button poll period
    pub fn button_poll_interval(&self) -> Duration {
        Duration::from_millis(self.button_poll_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_gives_defaults() {
        let config = BridgeConfig::from_toml_str("").unwrap();
        assert_eq!(config, BridgeConfig::default());
        assert_eq!(config.clock_divisor, 0xC8);
        assert_eq!(config.poll.ack, 2500);
    }

    #[test]
    fn test_sample_file_parses() {
        let config = BridgeConfig::from_toml_str(include_str!("../../pagewire.toml")).unwrap();
        assert_eq!(config.device_index, 0);
        assert_eq!(config.gpio_mask, 0x18);
        assert_eq!(config.reconnect_interval(), Duration::from_millis(1000));
        assert_eq!(config.poll.sync, 5000);
    }

    #[test]
    fn test_partial_poll_table() {
        let config = BridgeConfig::from_toml_str(
            r#"
            [bridge]
            clock_divisor = 0x12B

            [bridge.poll]
            ack = 100
            "#,
        )
        .unwrap();
        assert_eq!(config.clock_divisor, 0x12B);
        assert_eq!(config.poll.ack, 100);
        assert_eq!(config.poll.read_byte, 500);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let err = BridgeConfig::from_toml_str("[bridge]\nreconnect_interval_ms = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_wrong_type_is_parse_error() {
        let err = BridgeConfig::from_toml_str("[bridge]\ndevice_index = \"zero\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
