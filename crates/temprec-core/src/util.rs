//! Helpers for turning btleplug identifiers into strings.

use btleplug::platform::PeripheralId;

/// Address CoreBluetooth reports for every peripheral.
pub const HIDDEN_ADDRESS: &str = "00:00:00:00:00:00";

/// Format a peripheral ID as a string.
///
/// On macOS, peripheral IDs are UUIDs. On other platforms they wrap the
/// D-Bus path or the address. The `Debug` wrapper is stripped.
pub fn format_peripheral_id(id: &PeripheralId) -> String {
    strip_debug_wrapper(&format!("{:?}", id)).to_string()
}

fn strip_debug_wrapper(debug: &str) -> &str {
    debug
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
}

/// The address to show for a device.
///
/// Falls back to the peripheral ID when the platform hides the address.
pub fn display_address(address: &str, peripheral_id: &str) -> String {
    if address == HIDDEN_ADDRESS {
        peripheral_id.to_string()
    } else {
        address.to_string()
    }
}
