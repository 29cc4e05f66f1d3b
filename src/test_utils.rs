use crate::decoder::{WALNUT_MANUFACTURER_ID, WALNUT_SERVICE_UUID};
use crate::device::RawFrame;
use crate::mac_address::MacAddress;
use std::collections::HashMap;

/// A stable address for unit tests.
pub const TEST_MAC: MacAddress = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

/// Build a connectable Walnut advertisement from [`TEST_MAC`].
///
/// Tests can override just the fields they care about.
pub fn walnut_frame(rssi: i16, payload: &[u8]) -> RawFrame {
    RawFrame {
        address: TEST_MAC,
        rssi,
        manufacturer_data: HashMap::from([(WALNUT_MANUFACTURER_ID, payload.to_vec())]),
        service_uuids: vec![WALNUT_SERVICE_UUID],
        connectable: true,
    }
}
