//! Error types for payload decoding in temprec-types.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when decoding a characteristic payload.
///
/// This error type is platform-agnostic and does not include
/// BLE-specific errors (those belong in temprec-core).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
#[non_exhaustive]
pub enum DecodeError {
    /// The payload was empty, or held only padding.
    #[error("empty payload")]
    Empty,

    /// The payload is not valid UTF-8 text.
    #[error("payload is not valid UTF-8 (valid up to byte {valid_up_to} of {len})")]
    InvalidUtf8 {
        /// Length of the valid UTF-8 prefix.
        valid_up_to: usize,
        /// Total payload length.
        len: usize,
    },
}

/// Result type alias using temprec-types' DecodeError type.
pub type DecodeResult<T> = std::result::Result<T, DecodeError>;
