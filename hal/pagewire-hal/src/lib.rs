//! Pagewire Hardware Abstraction Layer
//!
//! This crate defines the narrow contract between the Pagewire protocol
//! engine and whatever driver actually talks to the USB bridge chip (D2XX,
//! libftdi, a simulator in tests). The engine never sees USB; it only sees
//! the byte-level primitives below.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  pagewire-oled / button consumers       │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  pagewire-i2c (MPSSE protocol engine)   │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  pagewire-hal (this crate - traits)     │
//! └─────────────────────────────────────────┘
//!                     │
//!         ┌───────────┴───────────┐
//!         ▼                       ▼
//! ┌───────────────┐       ┌───────────────┐
//! │  vendor D2XX  │       │   simulator   │
//! └───────────────┘       └───────────────┘
//! ```
//!
//! # Traits
//!
//! - [`transport::Transport`] - Raw bridge-chip operations

#![no_std]
#![deny(unsafe_code)]

pub mod device;
pub mod transport;

// Re-export key types at crate root for convenience
pub use device::{DeviceInfo, DeviceList, LOCATION_UNASSIGNED, MAX_DEVICES};
pub use transport::{BitMode, SpecialCharacters, Transport, TransportError};
