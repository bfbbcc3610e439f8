//! Telemetry events emitted by the scan controller and the session.
//!
//! The sink is the only channel through which a front end observes
//! progress. Events are serializable so they can be printed as JSON lines
//! or forwarded elsewhere.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use temprec_types::{DecodeError, DeviceIdentity, Reading};

use crate::error::FailureReason;

/// Events emitted while scanning, connecting and streaming.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum TelemetryEvent {
    /// A scan window was opened.
    Scanning { target: String },
    /// The target device advertised.
    DeviceFound { device: DeviceIdentity },
    /// A link is being opened.
    Connecting { device: DeviceIdentity },
    /// The link is up and services are being discovered.
    DiscoveringServices,
    /// Notifications are being enabled.
    EnablingNotifications,
    /// A value was received and decoded.
    Reading { reading: Reading },
    /// A value could not be decoded. Streaming continues.
    DecodeFailed { error: DecodeError },
    /// The link went down.
    Disconnected,
    /// The scan or session ended with a failure.
    Error { reason: FailureReason },
}

impl TelemetryEvent {
    /// Whether no further events follow for the same scan or session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Error { .. })
    }

    /// The failure carried by the event, if any.
    pub fn failure(&self) -> Option<FailureReason> {
        match self {
            Self::Error { reason } => Some(reason.clone()),
            Self::DecodeFailed { error } => Some(FailureReason::ValueDecode(error.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for TelemetryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scanning { target } => write!(f, "Scanning for {}...", target),
            Self::DeviceFound { device } => write!(f, "Found {}", device),
            Self::Connecting { device } => write!(f, "Connecting to {}...", device),
            Self::DiscoveringServices => write!(f, "Connected. Discovering services..."),
            Self::EnablingNotifications => write!(f, "Enabling notifications..."),
            Self::Reading { reading } => write!(f, "{}", reading),
            Self::DecodeFailed { error } => write!(f, "Could not decode value: {}", error),
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Error { reason } => write!(f, "Error: {}", reason),
        }
    }
}

/// Receiver side of a telemetry channel.
pub type TelemetryReceiver = mpsc::UnboundedReceiver<TelemetryEvent>;

/// Where telemetry events go.
///
/// Cloning is cheap; clones feed the same receiver. Emitting after the
/// receiver is dropped is silently ignored.
#[derive(Debug, Clone)]
pub struct TelemetrySink {
    sender: Option<mpsc::UnboundedSender<TelemetryEvent>>,
}

impl TelemetrySink {
    /// Wrap an existing sender.
    pub fn new(sender: mpsc::UnboundedSender<TelemetryEvent>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    /// A sink that drops every event.
    pub fn discard() -> Self {
        Self { sender: None }
    }

    /// Emit an event.
    pub fn emit(&self, event: TelemetryEvent) {
        match &event {
            TelemetryEvent::Reading { .. } => trace!(%event, "telemetry"),
            _ => debug!(%event, "telemetry"),
        }
        if let Some(sender) = &self.sender {
            // Ignore error if the receiver is gone
            let _ = sender.send(event);
        }
    }

    /// Whether anyone is still listening.
    pub fn is_open(&self) -> bool {
        self.sender.as_ref().is_some_and(|s| !s.is_closed())
    }
}

/// Create a sink and the receiver it feeds.
pub fn telemetry_channel() -> (TelemetrySink, TelemetryReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (TelemetrySink::new(tx), rx)
}
