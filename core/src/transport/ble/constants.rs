/// Over-the-air constants shared by tags, scanners and owner devices
use uuid::Uuid;

/// Manufacturer data vendor identifier carried by every tag advertisement
pub const VENDOR_ID: u16 = 0x6B5A;

/// Content byte 0 of a config-mode advertisement
pub const CONFIG_INDEX: u8 = 255;

/// Service UUID advertised next to beacon fragments (short form)
pub const BEACON_SERVICE_UUID_SHORT: u16 = 0x361F;

/// Provisioning service UUID (short form)
pub const CONFIG_SERVICE_UUID_SHORT: u16 = 0x361E;

/// Provisioning characteristic UUID (short form)
pub const CONFIG_CHARACTERISTIC_UUID_SHORT: u16 = 0x361D;

/// Seconds a config advertisement stays on air per cycle
pub const CONFIG_ADVERTISEMENT_DURATION_SECS: u16 = 30;

/// Seconds each beacon fragment advertisement stays on air per cycle
pub const BEACON_ADVERTISEMENT_DURATION_SECS: u16 = 3;

const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_00805F9B34FB;

/// Expand a 16-bit assigned number onto the Bluetooth base UUID
pub const fn uuid_from_short(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

pub const BEACON_SERVICE_UUID: Uuid = uuid_from_short(BEACON_SERVICE_UUID_SHORT);
pub const CONFIG_SERVICE_UUID: Uuid = uuid_from_short(CONFIG_SERVICE_UUID_SHORT);
pub const CONFIG_CHARACTERISTIC_UUID: Uuid = uuid_from_short(CONFIG_CHARACTERISTIC_UUID_SHORT);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_uuid_forms() {
        assert_eq!(
            BEACON_SERVICE_UUID.to_string(),
            "0000361f-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            CONFIG_SERVICE_UUID.to_string(),
            "0000361e-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            CONFIG_CHARACTERISTIC_UUID.to_string(),
            "0000361d-0000-1000-8000-00805f9b34fb"
        );
    }
}
