//! Client configuration.

use std::time::Duration;

use temprec_types::GattProfile;

use crate::error::{Error, Result};

/// Advertised name of the ESP32 thermometer.
pub const DEFAULT_DEVICE_NAME: &str = "ESP32-Thermo";

/// Default scan window.
pub const DEFAULT_SCAN_DURATION: Duration = Duration::from_millis(10_000);

/// Default timeout for establishing a link.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default timeout for service discovery.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for a [`Client`](crate::client::Client).
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use temprec_core::ClientConfig;
///
/// let config = ClientConfig::default()
///     .target_name("Garage-Thermo")
///     .scan_duration(Duration::from_secs(5));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Exact, case-sensitive advertised name to match.
    pub target_name: String,
    /// How long a scan window stays open.
    pub scan_duration: Duration,
    /// GATT attributes to subscribe to.
    pub profile: GattProfile,
    /// Timeout for establishing a link.
    pub connect_timeout: Duration,
    /// Timeout for service discovery.
    pub discovery_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            target_name: DEFAULT_DEVICE_NAME.to_string(),
            scan_duration: DEFAULT_SCAN_DURATION,
            profile: GattProfile::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the target device name.
    #[must_use]
    pub fn target_name(mut self, name: impl Into<String>) -> Self {
        self.target_name = name.into();
        self
    }

    /// Set the scan window.
    #[must_use]
    pub fn scan_duration(mut self, duration: Duration) -> Self {
        self.scan_duration = duration;
        self
    }

    /// Set the GATT profile.
    #[must_use]
    pub fn profile(mut self, profile: GattProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the service discovery timeout.
    #[must_use]
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Check the configuration for values that can never work.
    pub fn validate(&self) -> Result<()> {
        if self.target_name.is_empty() {
            return Err(Error::invalid_config("target name must not be empty"));
        }
        if self.scan_duration.is_zero() {
            return Err(Error::invalid_config("scan duration must be greater than zero"));
        }
        if self.connect_timeout.is_zero() {
            return Err(Error::invalid_config("connect timeout must be greater than zero"));
        }
        if self.discovery_timeout.is_zero() {
            return Err(Error::invalid_config(
                "discovery timeout must be greater than zero",
            ));
        }
        if self.profile.service == self.profile.characteristic {
            return Err(Error::invalid_config(
                "service and characteristic UUIDs must differ",
            ));
        }
        Ok(())
    }
}
