//! Pagewire I2C protocol engine
//!
//! Turns a USB bridge chip in MPSSE mode into an I2C master. The chip has no
//! I2C block of its own, so start/stop conditions, address and data bytes
//! and ACK sampling are all built from low-level pin and clocking commands.
//!
//! # Layers
//!
//! - [`mpsse`] - command vocabulary and byte-sequence builders
//! - [`I2cBus`] - synchronous engine: bring-up, transactions, scan, GPIO
//! - [`Bridge`] - shared session behind an async mutex, with the reconnect
//!   tick and ready-state notifications
//! - [`button`] - edge detection on the bridge's spare GPIO pins
//!
//! # Example
//!
//! ```ignore
//! let bridge = Bridge::new(driver, BridgeConfig::from_toml_str(&text)?);
//! bridge.register_init_action(|bus| bus.send_transaction(&[0x3C, 0x00, 0xAF]).is_ok()).await;
//! bridge.run_reconnect(Duration::from_millis(1000), &STOP).await;
//! ```

#![deny(unsafe_code)]

pub mod bridge;
pub mod bus;
pub mod button;
pub mod config;
pub mod error;
mod hal_i2c;
pub mod link;
pub mod mpsse;
#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use bridge::{Bridge, InitAction, ReadyReceiver, StopSignal, READY_CHANNEL_SIZE};
pub use bus::{I2cBus, ScanResult, Started, TransactionSink};
pub use button::{ButtonEvent, ButtonMonitor, GpioPin, PressState};
pub use config::{BridgeConfig, ConfigError, PollBudget};
pub use error::{BusError, TransactionFault};
pub use link::{LinkEvent, LinkState, ReadyChanged};

// Re-export the transport contract so downstream crates need one import
pub use pagewire_hal as hal;
