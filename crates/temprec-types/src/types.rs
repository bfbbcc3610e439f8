//! Core types for the thermometer link.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{DecodeError, DecodeResult};
use crate::uuid::{CLIENT_CHARACTERISTIC_CONFIG, TEMPERATURE_CHARACTERISTIC, THERMO_SERVICE};

/// Identity of a discovered peripheral.
///
/// Immutable once discovered. The scan controller hands it to the
/// connection session, which owns it for the life of the session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceIdentity {
    /// Opaque platform handle (peripheral ID on macOS, address elsewhere).
    pub id: String,
    /// Advertised local name, if the platform exposed it.
    pub name: Option<String>,
    /// Link-layer address. `00:00:00:00:00:00` on platforms that hide it.
    pub address: String,
}

impl DeviceIdentity {
    /// Create an identity without a name.
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            address: address.into(),
        }
    }

    /// Attach the advertised name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Name for display, falling back to the address.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.address),
            None => write!(f, "{}", self.address),
        }
    }
}

/// The GATT attributes the client subscribes to.
///
/// Configuration data, not runtime state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GattProfile {
    /// Service that must be present after discovery.
    pub service: Uuid,
    /// Characteristic carrying the readings.
    pub characteristic: Uuid,
    /// Descriptor written to enable notifications.
    pub cccd: Uuid,
}

impl Default for GattProfile {
    fn default() -> Self {
        Self {
            service: THERMO_SERVICE,
            characteristic: TEMPERATURE_CHARACTERISTIC,
            cccd: CLIENT_CHARACTERISTIC_CONFIG,
        }
    }
}

/// A decoded value from a characteristic-change event.
///
/// Transient: forwarded to the telemetry sink and not retained.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Reading {
    /// Decoded text, trimmed of NUL padding and surrounding whitespace.
    pub text: String,
    /// When the notification was decoded.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub received_at: OffsetDateTime,
}

impl Reading {
    /// Decode a raw notification payload as text.
    ///
    /// ESP32 firmware commonly sends C strings, so trailing NULs are
    /// stripped before trimming whitespace.
    ///
    /// # Examples
    ///
    /// ```
    /// use temprec_types::Reading;
    ///
    /// let reading = Reading::from_bytes(b"23.5\0").unwrap();
    /// assert_eq!(reading.text, "23.5");
    /// assert!(Reading::from_bytes(&[0xff, 0xfe]).is_err());
    /// ```
    pub fn from_bytes(data: &[u8]) -> DecodeResult<Self> {
        Self::from_bytes_at(data, OffsetDateTime::now_utc())
    }

    /// Decode a payload with an explicit receive timestamp.
    pub fn from_bytes_at(data: &[u8], received_at: OffsetDateTime) -> DecodeResult<Self> {
        let text = std::str::from_utf8(data).map_err(|e| DecodeError::InvalidUtf8 {
            valid_up_to: e.valid_up_to(),
            len: data.len(),
        })?;

        let text = text.trim_end_matches('\0').trim();
        if text.is_empty() {
            return Err(DecodeError::Empty);
        }

        Ok(Self {
            text: text.to_string(),
            received_at,
        })
    }

    /// Parse the leading number of the text as degrees Celsius.
    ///
    /// Accepts bare values (`"23.5"`) and values with a unit suffix
    /// (`"23.5C"`, `"23.5 °C"`). Returns `None` when there is no finite number.
    ///
    /// ```
    /// use temprec_types::Reading;
    ///
    /// assert_eq!(Reading::from_bytes(b"-4.25 C").unwrap().celsius(), Some(-4.25));
    /// assert_eq!(Reading::from_bytes(b"n/a").unwrap().celsius(), None);
    /// ```
    #[must_use]
    pub fn celsius(&self) -> Option<f32> {
        let end = self
            .text
            .char_indices()
            .find(|&(i, c)| !(c.is_ascii_digit() || c == '.' || (i == 0 && (c == '-' || c == '+'))))
            .map_or(self.text.len(), |(i, _)| i);

        self.text[..end]
            .parse::<f32>()
            .ok()
            .filter(|value| value.is_finite())
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.celsius() {
            Some(value) => write!(f, "Temperature: {} °C", value),
            None => write!(f, "{}", self.text),
        }
    }
}
