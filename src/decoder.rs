//! Walnut manufacturer data decoding.
//!
//! The manufacturer data stored under company id [`WALNUT_MANUFACTURER_ID`] is a
//! concatenation of 4-byte records:
//!
//! | bytes | meaning                          |
//! |-------|----------------------------------|
//! | 0..2  | sensor tag, big-endian `u16`     |
//! | 2..4  | sensor value, big-endian 16 bits |
//!
//! Tag `1` is temperature (signed, tenths of °C) and tag `2` is humidity
//! (unsigned, tenths of percent). Other tags are skipped. A trailing partial
//! record is ignored.

use crate::sensor::SensorReading;
use log::debug;
use uuid::Uuid;

/// Company identifier under which Walnut devices publish manufacturer data (979).
pub const WALNUT_MANUFACTURER_ID: u16 = 0x03D3;

/// Service UUID advertised by Walnut devices.
pub const WALNUT_SERVICE_UUID: Uuid = Uuid::from_u128(0x00001100_0f58_2ba7_72c3_4d8d58fa16de);

/// Standard GATT Battery Level characteristic.
pub const BATTERY_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb);

const RECORD_LEN: usize = 4;
const TAG_TEMPERATURE: u16 = 1;
const TAG_HUMIDITY: u16 = 2;

/// Decode a Walnut manufacturer data payload into sensor readings.
///
/// Readings are returned in record order. Duplicate tags each yield a
/// reading. Never fails: empty input, unknown tags and truncated trailing
/// bytes all degrade to fewer readings.
pub fn decode(payload: &[u8]) -> Vec<SensorReading> {
    let records = payload.chunks_exact(RECORD_LEN);
    let trailing = records.remainder().len();
    if trailing > 0 {
        debug!("Ignoring {trailing} trailing byte(s) in Walnut payload {payload:02X?}");
    }

    records.filter_map(decode_record).collect()
}

fn decode_record(record: &[u8]) -> Option<SensorReading> {
    let tag = u16::from_be_bytes([record[0], record[1]]);
    let raw = [record[2], record[3]];

    match tag {
        TAG_TEMPERATURE => Some(SensorReading::temperature(
            f64::from(i16::from_be_bytes(raw)) / 10.0,
        )),
        TAG_HUMIDITY => Some(SensorReading::humidity(
            f64::from(u16::from_be_bytes(raw)) / 10.0,
        )),
        _ => {
            debug!("Skipping unknown Walnut sensor tag {tag}");
            None
        }
    }
}
