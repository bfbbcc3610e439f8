//! BLE central client for an ESP32 thermometer.
//!
//! This crate scans for a peripheral advertising a given name (by default
//! `ESP32-Thermo`), connects over GATT, enables notifications on the
//! temperature characteristic and streams each notified value as a
//! [`TelemetryEvent`].
//!
//! # Features
//!
//! - **Bounded scan**: one window per call, exact name match, exactly one outcome
//! - **Explicit state machine**: `Idle → Connecting → ServiceDiscovery →
//!   EnablingNotifications → Streaming`, ending in `Disconnected` or `Error`
//! - **Capability gate**: every scan, connect and subscribe asks first
//! - **Telemetry stream**: ordered, serializable status and value events
//! - **Pluggable radio**: btleplug for hardware, [`MockRadio`] for tests
//!
//! # Architecture
//!
//! | Piece | Role |
//! |-------|------|
//! | [`Radio`] | BLE primitives; results arrive as events |
//! | [`Scanner`] | scan windows and name filtering |
//! | [`Session`] | one GATT link, driven by link events |
//! | [`Client`] | scan → session pipeline |
//! | [`TelemetrySink`] | where status and readings go |
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use temprec_core::{AllowAll, BtleRadio, Client, ClientConfig, TelemetryEvent, telemetry_channel};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let radio = Arc::new(BtleRadio::new().await?);
//!     let (sink, mut events) = telemetry_channel();
//!     let client = Client::new(radio, Arc::new(AllowAll), sink, ClientConfig::default())?;
//!
//!     let handle = client.start();
//!     while let Some(event) = events.recv().await {
//!         println!("{}", event);
//!         if event.is_terminal() {
//!             break;
//!         }
//!     }
//!     handle.wait().await?;
//!     Ok(())
//! }
//! ```

pub mod btle;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod gate;
pub mod mock;
pub mod radio;
pub mod scan;
pub mod session;
pub mod util;

// Re-export types and uuid modules from temprec-types
pub use temprec_types::uuid;
pub use temprec_types::{DecodeError, DeviceIdentity, GattProfile, Reading};

// Core exports
pub use btle::{BtleRadio, ConnectionConfig, get_adapter};
pub use client::{Client, ClientHandle, RunOutcome};
pub use config::{ClientConfig, DEFAULT_DEVICE_NAME, DEFAULT_SCAN_DURATION};
pub use error::{Error, FailureReason, Result};
pub use events::{TelemetryEvent, TelemetryReceiver, TelemetrySink, telemetry_channel};
pub use gate::{AllowAll, CapabilityGate, Operation, PolicyGate};
pub use mock::{MockRadio, MockRadioBuilder, RadioCall};
pub use radio::{
    GattCharacteristic, GattService, LinkEvent, LinkHandle, LinkState, Radio, ScanEvent,
};
pub use scan::{ScanHandle, ScanOutcome, Scanner, name_matches};
pub use session::{Session, SessionHandle, SessionState};
