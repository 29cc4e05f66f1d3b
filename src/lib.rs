//! `walnut-listener` library.
//!
//! Decodes Walnut sensor advertisements and polls battery level over GATT.
//! The binary (`src/main.rs`) is responsible for CLI parsing, logging setup
//! and process exit codes. Scheduling lives in [`crate::app`] where it can be
//! tested with an injected scanner and transport.

pub mod alias;
pub mod app;
pub mod decoder;
pub mod device;
pub mod mac_address;
pub mod output;
pub mod poll;
pub mod retry;
pub mod scanner;
pub mod sensor;
pub mod session;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use decoder::{BATTERY_CHARACTERISTIC_UUID, WALNUT_MANUFACTURER_ID, WALNUT_SERVICE_UUID, decode};
pub use device::{DeviceSnapshot, DeviceState, RawFrame};
pub use mac_address::MacAddress;
pub use output::OutputFormatter;
pub use output::influxdb::InfluxDbFormatter;
pub use poll::PollPolicy;
pub use retry::RetryPolicy;
pub use scanner::{ScanError, Scanner};
pub use sensor::{SensorKind, SensorReading};
pub use session::{ConnectionOutcome, Transport, TransportError};
