//! Output formatters for Walnut device snapshots.

pub mod influxdb;

use crate::device::DeviceSnapshot;

/// Trait for formatting device snapshots into output lines.
pub trait OutputFormatter: Send + Sync {
    /// Format a snapshot, reporting the device under `name`.
    fn format(&self, snapshot: &DeviceSnapshot, name: &str) -> String;
}
