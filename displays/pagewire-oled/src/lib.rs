//! Pagewire OLED engine
//!
//! Host-side framebuffer for page-addressed monochrome panels (SSD1306,
//! SH1106) hanging off a Pagewire I2C bridge.
//!
//! ```text
//!   draw_* / write_string          update / update_dirty_bytes
//!   ───────────────────► Canvas ───────────────────────────────► TransactionSink
//!                      (buffer +        snapshot, drain,          (I2cBus, Bridge)
//!                       dirty set)      [addr, 0x00|0x40, ...]
//! ```
//!
//! Pixel (x, y) lives in byte `x + (y / 8) * width`, bit `y % 8`. Only bytes
//! whose value actually changes are marked dirty, so redrawing identical
//! content costs nothing on the wire.

#![deny(unsafe_code)]

pub mod command;
pub mod config;
pub mod display;
pub mod error;
pub mod font;
pub mod framebuffer;
pub mod text;

pub use config::{Controller, DisplayConfig, ScreenConfig, SCREEN_CONFIGS};
pub use display::{DisplayState, Oled};
pub use error::DisplayError;
pub use font::{Font, Font5x7};
pub use framebuffer::{BitmapFormat, Canvas, Color};
pub use text::TextStyle;
