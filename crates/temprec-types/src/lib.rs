//! Platform-agnostic types for the temprec BLE temperature receiver.
//!
//! This crate holds the data model shared by the BLE core and any
//! front end that displays its output:
//!
//! - [`DeviceIdentity`] for discovered peripherals
//! - [`GattProfile`] naming the service, characteristic and CCCD
//! - [`Reading`] and its text decoding
//! - UUID constants for the ESP32 thermometer
//!
//! # Example
//!
//! ```
//! use temprec_types::{GattProfile, Reading, uuid};
//!
//! let profile = GattProfile::default();
//! assert_eq!(profile.characteristic, uuid::TEMPERATURE_CHARACTERISTIC);
//!
//! let reading = Reading::from_bytes(b"21.75").unwrap();
//! assert_eq!(reading.celsius(), Some(21.75));
//! ```

pub mod error;
pub mod types;
pub mod uuid;

pub use error::{DecodeError, DecodeResult};
pub use types::{DeviceIdentity, GattProfile, Reading};
