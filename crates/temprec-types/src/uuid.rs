//! Bluetooth UUIDs for the ESP32 thermometer peripheral.
//!
//! The service and characteristic UUIDs are the ones flashed into the
//! peripheral firmware. The CCCD is the standard Bluetooth SIG descriptor.

use uuid::{Uuid, uuid};

// --- Thermometer service ---

/// Custom service exposing the temperature characteristic.
pub const THERMO_SERVICE: Uuid = uuid!("12345678-1234-1234-1234-1234567890ab");

/// Temperature characteristic. Notifies text-encoded readings such as `"23.5"`.
pub const TEMPERATURE_CHARACTERISTIC: Uuid = uuid!("abcd1234-ab12-cd34-ef56-abcdef123456");

// --- Standard descriptors ---

/// Client Characteristic Configuration Descriptor (0x2902).
pub const CLIENT_CHARACTERISTIC_CONFIG: Uuid = uuid!("00002902-0000-1000-8000-00805f9b34fb");

/// CCCD value enabling notifications (little-endian 0x0001).
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// CCCD value disabling notifications and indications.
pub const DISABLE_NOTIFICATION_VALUE: [u8; 2] = [0x00, 0x00];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thermo_service_uuid() {
        assert_eq!(
            THERMO_SERVICE.to_string(),
            "12345678-1234-1234-1234-1234567890ab"
        );
    }

    #[test]
    fn test_temperature_characteristic_uuid() {
        assert_eq!(
            TEMPERATURE_CHARACTERISTIC.to_string(),
            "abcd1234-ab12-cd34-ef56-abcdef123456"
        );
    }

    #[test]
    fn test_cccd_is_16_bit_sig_uuid() {
        let s = CLIENT_CHARACTERISTIC_CONFIG.to_string();
        assert!(s.starts_with("00002902"));
        assert!(s.ends_with("-0000-1000-8000-00805f9b34fb"));
    }

    #[test]
    fn test_uuids_are_distinct() {
        assert_ne!(THERMO_SERVICE, TEMPERATURE_CHARACTERISTIC);
        assert_ne!(TEMPERATURE_CHARACTERISTIC, CLIENT_CHARACTERISTIC_CONFIG);
        assert_ne!(THERMO_SERVICE, CLIENT_CHARACTERISTIC_CONFIG);
    }

    #[test]
    fn test_notification_values() {
        assert_eq!(u16::from_le_bytes(ENABLE_NOTIFICATION_VALUE), 1);
        assert_eq!(u16::from_le_bytes(DISABLE_NOTIFICATION_VALUE), 0);
    }
}
