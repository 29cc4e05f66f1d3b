//! Per-device state accumulated across advertisements and polls.

use crate::decoder::{self, WALNUT_MANUFACTURER_ID, WALNUT_SERVICE_UUID};
use crate::mac_address::MacAddress;
use crate::sensor::{SensorKind, SensorReading};
use crate::session::ConnectionOutcome;
use log::debug;
use std::collections::{BTreeMap, HashMap};
use std::time::{Instant, SystemTime};
use uuid::Uuid;

/// Manufacturer reported for every Walnut device.
pub const MANUFACTURER: &str = "Sigma";

/// One advertisement as delivered by the scanning backend.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub address: MacAddress,
    /// Received signal strength in dBm.
    pub rssi: i16,
    /// Manufacturer data keyed by company id.
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
    pub service_uuids: Vec<Uuid>,
    /// Whether the device can currently be connected to for a GATT read.
    pub connectable: bool,
}

impl RawFrame {
    /// The Walnut payload, if this frame carries one.
    pub fn walnut_payload(&self) -> Option<&[u8]> {
        self.manufacturer_data
            .get(&WALNUT_MANUFACTURER_ID)
            .map(Vec::as_slice)
    }

    /// Whether the frame identifies a Walnut device: it has to advertise the
    /// Walnut service and carry Walnut manufacturer data.
    pub fn is_walnut_device(&self) -> bool {
        self.service_uuids.contains(&WALNUT_SERVICE_UUID) && self.walnut_payload().is_some()
    }
}

/// Accumulated state of one physical Walnut device.
///
/// Readings are kept per kind, latest value wins, and are never cleared: a
/// reading that is not refreshed stays at its last known value.
#[derive(Debug, Clone)]
pub struct DeviceState {
    address: MacAddress,
    device_name: String,
    manufacturer: &'static str,
    readings: BTreeMap<SensorKind, SensorReading>,
    last_poll: Option<Instant>,
    updated_at: SystemTime,
}

impl DeviceState {
    pub fn new(address: MacAddress) -> Self {
        Self {
            address,
            device_name: format!("Walnut {}", address.short_address()),
            manufacturer: MANUFACTURER,
            readings: BTreeMap::new(),
            last_poll: None,
            updated_at: SystemTime::UNIX_EPOCH,
        }
    }

    pub fn address(&self) -> MacAddress {
        self.address
    }

    pub fn last_poll(&self) -> Option<Instant> {
        self.last_poll
    }

    pub fn reading(&self, kind: SensorKind) -> Option<&SensorReading> {
        self.readings.get(&kind)
    }

    /// Merge an advertisement into the state.
    ///
    /// Touches `readings` (decoded values plus signal strength), `device_name`,
    /// `manufacturer` and `updated_at`. Frames without Walnut manufacturer
    /// data leave the state untouched and return `false`.
    pub fn apply_advertisement(&mut self, frame: &RawFrame) -> bool {
        let Some(payload) = frame.walnut_payload() else {
            debug!("No Walnut manufacturer data from {}", frame.address);
            return false;
        };

        debug!("Parsing Walnut manufacturer data from {}: {payload:02X?}", frame.address);
        self.manufacturer = MANUFACTURER;
        self.device_name = format!("Walnut {}", frame.address.short_address());

        self.merge(SensorReading::signal_strength(frame.rssi));
        for reading in decoder::decode(payload) {
            self.merge(reading);
        }
        self.updated_at = SystemTime::now();
        true
    }

    /// Merge the result of a battery poll.
    ///
    /// Only a successful outcome touches `readings` and `updated_at`; a failed
    /// poll keeps the previous battery reading.
    pub fn apply_poll_result(&mut self, outcome: &ConnectionOutcome) {
        if let ConnectionOutcome::Success(reading) = outcome {
            self.merge(*reading);
            self.updated_at = SystemTime::now();
        }
    }

    /// Record that a poll was attempted at `at`. Touches only `last_poll`.
    pub fn record_poll(&mut self, at: Instant) {
        self.last_poll = Some(at);
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            address: self.address,
            name: self.device_name.clone(),
            manufacturer: self.manufacturer,
            readings: self.readings.clone(),
            timestamp: self.updated_at,
        }
    }

    fn merge(&mut self, reading: SensorReading) {
        self.readings.insert(reading.kind(), reading);
    }
}

/// Immutable view of a device handed to the output layer.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSnapshot {
    pub address: MacAddress,
    pub name: String,
    pub manufacturer: &'static str,
    pub readings: BTreeMap<SensorKind, SensorReading>,
    /// Wall clock time of the last change to `readings`.
    pub timestamp: SystemTime,
}

impl DeviceSnapshot {
    pub fn value(&self, kind: SensorKind) -> Option<f64> {
        self.readings.get(&kind).map(SensorReading::value)
    }
}
