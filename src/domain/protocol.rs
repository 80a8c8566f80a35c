//! Remote control GATT identifiers
//!
//! All identifiers are fixed; nothing is negotiated with the peripheral.

use uuid::Uuid;

/// Control service UUID
pub const SERVICE_UUID: &str = "12345678-1234-5678-1234-56789abcdef0";

/// Writable and notifiable control characteristic UUID
pub const CONTROL_CHAR_UUID: &str = "87654321-4321-6789-4321-6789abcdef01";

/// Client Characteristic Configuration descriptor, written by the stack when
/// subscribing
pub const CCCD_UUID: &str = "00002902-0000-1000-8000-00805f9b34fb";

const SERVICE: Uuid = Uuid::from_u128(0x12345678_1234_5678_1234_56789abcdef0);
const CONTROL_CHAR: Uuid = Uuid::from_u128(0x87654321_4321_6789_4321_6789abcdef01);
const CCCD: Uuid = Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

pub fn service_uuid() -> Uuid {
    SERVICE
}

pub fn control_char_uuid() -> Uuid {
    CONTROL_CHAR
}

pub fn cccd_uuid() -> Uuid {
    CCCD
}

/// Decode a notification payload for display
pub fn decode_telemetry(value: &[u8]) -> String {
    String::from_utf8_lossy(value).into_owned()
}
