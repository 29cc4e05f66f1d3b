//! BlueZ D-Bus backend for Walnut advertisement scanning.
//!
//! An advertisement monitor filtered on the Walnut company id reports each
//! device once; after that, property changes of the device (RSSI and
//! manufacturer data) are turned into new frames. Frames identical to the
//! previous one of the same device are dropped.

use super::{FRAME_CHANNEL_BUFFER_SIZE, ScanError};
use crate::decoder::WALNUT_MANUFACTURER_ID;
use crate::device::RawFrame;
use crate::mac_address::MacAddress;
use bluer::monitor::{Monitor, MonitorEvent, Pattern};
use bluer::{Adapter, Address, Device, DeviceEvent, DeviceProperty, Session};
use futures::StreamExt;
use log::{debug, warn};
use std::collections::HashMap;
use std::pin::pin;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Bluetooth manufacturer-specific data type (AD type 0xFF)
const MANUFACTURER_DATA_TYPE: u8 = 0xff;

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// Start scanning for Walnut advertisements using the BlueZ D-Bus backend.
///
/// Runs until the returned receiver is dropped.
pub async fn start_scan() -> Result<mpsc::Receiver<RawFrame>, ScanError> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;

    let (tx, rx) = mpsc::channel(FRAME_CHANNEL_BUFFER_SIZE);

    // Company ids are little-endian on air
    let pattern = Pattern {
        data_type: MANUFACTURER_DATA_TYPE,
        start_position: 0,
        content: WALNUT_MANUFACTURER_ID.to_le_bytes().to_vec(),
    };

    let monitor_manager = adapter.monitor().await?;
    let mut monitor_handle = monitor_manager
        .register(Monitor {
            patterns: Some(vec![pattern]),
            ..Default::default()
        })
        .await?;

    tokio::spawn(async move {
        // Keep all Bluetooth state alive by moving it into this task
        let _session = session;
        let _monitor_manager = monitor_manager;
        let mut watchers: HashMap<Address, JoinHandle<()>> = HashMap::new();

        while let Some(event) = monitor_handle.next().await {
            if tx.is_closed() {
                break;
            }
            let MonitorEvent::DeviceFound(device_id) = event else {
                continue;
            };
            let address = device_id.device;
            // BlueZ ends a device's event stream when it forgets the device
            if watchers.get(&address).is_none_or(JoinHandle::is_finished) {
                watchers.insert(address, watch_device(&adapter, address, tx.clone()));
            }
        }
    });

    Ok(rx)
}

/// Forward a frame for the device now, then whenever it reports fresh
/// advertisement data.
fn watch_device(adapter: &Adapter, address: Address, tx: mpsc::Sender<RawFrame>) -> JoinHandle<()> {
    let adapter = adapter.clone();
    tokio::spawn(async move {
        let device = match adapter.device(address) {
            Ok(device) => device,
            Err(e) => {
                warn!("Cannot watch {address}: {e}");
                return;
            }
        };
        let events = match device.events().await {
            Ok(events) => events,
            Err(e) => {
                warn!("Cannot watch {address}: {e}");
                return;
            }
        };
        let mut events = pin!(events);
        let mut last = None;

        if let Err(e) = send_changed(&device, &tx, &mut last).await {
            debug!("Failed to read advertisement of {address}: {e}");
        }

        while let Some(DeviceEvent::PropertyChanged(property)) = events.next().await {
            if !matches!(
                property,
                DeviceProperty::ManufacturerData(_) | DeviceProperty::Rssi(_)
            ) {
                continue;
            }
            if tx.is_closed() {
                break;
            }
            if let Err(e) = send_changed(&device, &tx, &mut last).await {
                debug!("Failed to read advertisement of {address}: {e}");
            }
        }
    })
}

/// Send the device's current frame unless it repeats the last one sent.
///
/// One advertisement usually changes both RSSI and manufacturer data.
async fn send_changed(
    device: &Device,
    tx: &mpsc::Sender<RawFrame>,
    last: &mut Option<RawFrame>,
) -> Result<(), ScanError> {
    if let Some(frame) = read_frame(device).await?.and_then(|frame| changed(last, frame)) {
        let _ = tx.send(frame).await;
    }
    Ok(())
}

fn changed(last: &mut Option<RawFrame>, frame: RawFrame) -> Option<RawFrame> {
    if last.as_ref() == Some(&frame) {
        return None;
    }
    *last = Some(frame.clone());
    Some(frame)
}

/// Snapshot the advertisement properties BlueZ holds for `device`.
async fn read_frame(device: &Device) -> Result<Option<RawFrame>, ScanError> {
    let Some(manufacturer_data) = device.manufacturer_data().await? else {
        return Ok(None);
    };
    // BlueZ drops RSSI once the device goes out of range
    let Some(rssi) = device.rssi().await? else {
        return Ok(None);
    };
    let service_uuids = device.uuids().await?.unwrap_or_default();

    Ok(Some(RawFrame {
        address: MacAddress::from(device.address()),
        rssi,
        manufacturer_data: manufacturer_data.into_iter().collect(),
        service_uuids: service_uuids.into_iter().collect(),
        // BlueZ does not expose the advertisement's connectable flag
        connectable: true,
    }))
}
