//! Error types for temprec-core.
//!
//! Two kinds of failure live here:
//!
//! - [`Error`] is returned from API calls (starting a scan, issuing a radio
//!   request, building a client). These are ordinary `Result` errors.
//! - [`FailureReason`] is the reason a scan window or a connection session
//!   ended. It is never returned as an `Err`; it is surfaced once, as a
//!   [`TelemetryEvent::Error`](crate::events::TelemetryEvent::Error), and
//!   recorded in [`SessionState::Error`](crate::session::SessionState::Error).
//!
//! # Failure reasons
//!
//! | Reason | Ends | Typical cause |
//! |--------|------|---------------|
//! | [`FailureReason::PermissionDenied`] | scan or session | capability gate said no |
//! | [`FailureReason::AdapterUnavailable`] | scan | no adapter, or adapter powered off |
//! | [`FailureReason::ScanFailed`] | scan | radio refused to start scanning |
//! | [`FailureReason::ScanTimedOut`] | scan | no matching advertisement in the window |
//! | [`FailureReason::LinkError`] | session | connect or discovery reported a non-zero status |
//! | [`FailureReason::TargetNotFound`] | session | service or characteristic missing |
//! | [`FailureReason::NotificationSetupFailed`] | session | CCCD missing or write rejected |
//! | [`FailureReason::ValueDecode`] | nothing | one bad payload; streaming continues |
//!
//! None of them is retried automatically. Retrying means starting a new
//! scan.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use temprec_types::DecodeError;

use crate::gate::Operation;
use crate::radio::{LinkHandle, status};

/// Errors returned by temprec-core operations.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// No Bluetooth adapter is available.
    #[error("No Bluetooth adapter available")]
    AdapterUnavailable,

    /// A scan window is already active on this scanner.
    #[error("A scan is already in progress")]
    ScanInProgress,

    /// The device is not known to the radio (never advertised, or evicted).
    #[error("Device not found: {id}")]
    DeviceNotFound {
        /// The opaque device identifier that was looked up.
        id: String,
    },

    /// A request referenced a link the radio does not know.
    #[error("Unknown link {0}")]
    UnknownLink(LinkHandle),

    /// The characteristic is not present on the connected device.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID that was not found.
        uuid: String,
    },

    /// The session was asked to connect while not idle.
    #[error("Session is not idle (state: {state})")]
    SessionNotIdle {
        /// The state the session was in.
        state: String,
    },

    /// The session was asked to reset while still running.
    #[error("Session is still running (state: {state})")]
    SessionRunning {
        /// The state the session was in.
        state: String,
    },

    /// The radio rejected a request.
    #[error("Radio request '{operation}' failed: {reason}")]
    Radio {
        /// The request that failed.
        operation: String,
        /// The reason reported by the radio.
        reason: String,
    },

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// The background task owning the operation went away.
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create a radio request failure.
    pub fn radio(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Radio {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Create a device not found error.
    pub fn device_not_found(id: impl Into<String>) -> Self {
        Self::DeviceNotFound { id: id.into() }
    }
}

/// Result type alias using temprec-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a scan window or connection session ended.
///
/// Every variant maps to a distinct human-readable string through
/// `Display`, so a front end can give specific guidance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
#[non_exhaustive]
pub enum FailureReason {
    /// The capability gate refused the operation.
    PermissionDenied(Operation),
    /// No usable Bluetooth adapter.
    AdapterUnavailable,
    /// The radio reported a scan failure with this status code.
    ScanFailed(i32),
    /// The scan window expired without a matching advertisement.
    ScanTimedOut,
    /// The link layer reported this status code.
    LinkError(i32),
    /// Service discovery finished without the target service or characteristic.
    TargetNotFound,
    /// Notifications could not be enabled.
    NotificationSetupFailed,
    /// A single value could not be decoded. Recoverable.
    ValueDecode(DecodeError),
}

impl FailureReason {
    /// Whether the failure leaves the session running.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::ValueDecode(_))
    }

    /// Map an error from a scan request to a failure reason.
    pub fn from_scan_error(err: &Error) -> Self {
        match err {
            Error::AdapterUnavailable => Self::AdapterUnavailable,
            _ => Self::ScanFailed(status::SCAN_FAILED_INTERNAL_ERROR),
        }
    }

    /// Map an error from a link or GATT request to a failure reason.
    pub fn from_link_error(err: &Error) -> Self {
        match err {
            Error::AdapterUnavailable => Self::AdapterUnavailable,
            Error::Timeout { .. } => Self::LinkError(status::CONNECTION_TIMEOUT),
            _ => Self::LinkError(status::GATT_FAILURE),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PermissionDenied(op) => write!(f, "permission denied: {} not authorized", op),
            Self::AdapterUnavailable => write!(f, "Bluetooth adapter unavailable"),
            Self::ScanFailed(code) => write!(f, "scan failed (status {})", code),
            Self::ScanTimedOut => write!(f, "device not found (scan timed out)"),
            Self::LinkError(code) => write!(f, "link error (status {:#04x})", code),
            Self::TargetNotFound => write!(f, "temperature service or characteristic not found"),
            Self::NotificationSetupFailed => write!(f, "notification setup failed"),
            Self::ValueDecode(err) => write!(f, "could not decode value: {}", err),
        }
    }
}

impl From<DecodeError> for FailureReason {
    fn from(err: DecodeError) -> Self {
        Self::ValueDecode(err)
    }
}
