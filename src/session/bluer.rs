//! BlueZ D-Bus transport for GATT polling.
//!
//! Requires the `bluetoothd` daemon. Connection establishment is retried here
//! on transient BlueZ errors; the session layer only retries reads.

use super::{Transport, TransportError, TransportFuture};
use crate::mac_address::MacAddress;
use crate::retry::{Retried, RetryPolicy, retry};
use bluer::gatt::remote::Characteristic;
use bluer::{Adapter, Device, ErrorKind, Session};
use log::debug;
use uuid::Uuid;

impl From<bluer::Error> for TransportError {
    fn from(err: bluer::Error) -> Self {
        match err.kind {
            ErrorKind::InProgress | ErrorKind::NotReady => TransportError::Busy,
            ErrorKind::ConnectionAttemptFailed | ErrorKind::Failed => {
                TransportError::ConnectionDropped(err.message)
            }
            ErrorKind::ServicesUnresolved | ErrorKind::NotAvailable => {
                TransportError::CharacteristicUnavailable(err.message)
            }
            ErrorKind::DoesNotExist | ErrorKind::NotFound => TransportError::DeviceNotFound,
            ErrorKind::NotAuthorized
            | ErrorKind::AuthenticationFailed
            | ErrorKind::AuthenticationRejected
            | ErrorKind::AuthenticationCanceled => TransportError::AuthenticationFailed,
            _ => TransportError::Other(err.to_string()),
        }
    }
}

/// [`Transport`] backed by the default BlueZ adapter.
pub struct BluerTransport {
    // Keeps the D-Bus connection alive for the adapter.
    _session: Session,
    adapter: Adapter,
    connect_retry: RetryPolicy,
}

impl BluerTransport {
    /// Open a BlueZ session and power on the default adapter.
    pub async fn new(connect_retry: RetryPolicy) -> Result<Self, TransportError> {
        let session = Session::new().await?;
        let adapter = session.default_adapter().await?;
        adapter.set_powered(true).await?;

        Ok(Self {
            _session: session,
            adapter,
            connect_retry,
        })
    }

    async fn connect_device(&self, address: MacAddress) -> Result<Device, TransportError> {
        let device = self.adapter.device(address.into())?;

        let connected = retry(&self.connect_retry, TransportError::is_transient, || {
            ensure_connected(&device)
        })
        .await;

        match connected {
            Retried::Ok(()) => {
                debug!("Connected to {address}");
                Ok(device)
            }
            Retried::Exhausted { error, .. } | Retried::Fatal(error) => Err(error),
        }
    }
}

async fn ensure_connected(device: &Device) -> Result<(), TransportError> {
    if !device.is_connected().await? {
        device.connect().await?;
    }
    Ok(())
}

/// Find a characteristic by UUID across all services of a connected device.
async fn find_characteristic(
    device: &Device,
    uuid: Uuid,
) -> Result<Characteristic, TransportError> {
    for service in device.services().await? {
        for characteristic in service.characteristics().await? {
            if characteristic.uuid().await? == uuid {
                return Ok(characteristic);
            }
        }
    }

    if device.is_services_resolved().await? {
        Err(TransportError::UnsupportedCharacteristic(uuid))
    } else {
        Err(TransportError::CharacteristicUnavailable(
            "services not resolved yet".to_string(),
        ))
    }
}

async fn read_characteristic(device: &Device, uuid: Uuid) -> Result<Vec<u8>, TransportError> {
    let characteristic = find_characteristic(device, uuid).await?;
    Ok(characteristic.read().await?)
}

impl Transport for BluerTransport {
    type Session = Device;

    fn connect(&self, address: MacAddress) -> TransportFuture<'_, Device> {
        Box::pin(self.connect_device(address))
    }

    fn read_characteristic<'a>(
        &'a self,
        session: &'a Device,
        uuid: Uuid,
    ) -> TransportFuture<'a, Vec<u8>> {
        Box::pin(read_characteristic(session, uuid))
    }

    fn disconnect(&self, session: Device) -> TransportFuture<'_, ()> {
        Box::pin(async move { session.disconnect().await.map_err(TransportError::from) })
    }
}
