//! Active GATT polling of a Walnut device.
//!
//! A poll is one sequential connect, battery read, disconnect cycle against a
//! [`Transport`]. The read is retried on transient errors through
//! [`crate::retry`]. Every failure is folded into a [`ConnectionOutcome`]; the
//! connection is always released before a poll returns.

#[cfg(feature = "bluer")]
pub mod bluer;

use crate::decoder::BATTERY_CHARACTERISTIC_UUID;
use crate::mac_address::MacAddress;
use crate::retry::{Retried, RetryPolicy, retry};
use crate::sensor::SensorReading;
use log::{debug, warn};
use std::convert::Infallible;
use std::future::{self, Future};
use std::pin::Pin;
use thiserror::Error;
use uuid::Uuid;

/// Errors reported by a [`Transport`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("connection dropped: {0}")]
    ConnectionDropped(String),
    #[error("characteristic temporarily unavailable: {0}")]
    CharacteristicUnavailable(String),
    #[error("GATT busy")]
    Busy,
    #[error("device not found")]
    DeviceNotFound,
    #[error("characteristic {0} not supported")]
    UnsupportedCharacteristic(Uuid),
    #[error("authentication failed")]
    AuthenticationFailed,
    /// The device answered with something that breaks the protocol.
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("Bluetooth error: {0}")]
    Other(String),
}

impl TransportError {
    /// Whether an immediate retry is likely to succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectionDropped(_)
                | TransportError::CharacteristicUnavailable(_)
                | TransportError::Busy
        )
    }
}

/// Result of a single poll.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionOutcome {
    Success(SensorReading),
    TransientFailure(TransportError),
    PermanentFailure(TransportError),
}

impl ConnectionOutcome {
    fn from_error(error: TransportError) -> Self {
        if error.is_transient() {
            ConnectionOutcome::TransientFailure(error)
        } else {
            ConnectionOutcome::PermanentFailure(error)
        }
    }
}

/// The poll was cancelled before it produced an outcome.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("poll cancelled")]
pub struct Cancelled;

/// Boxed future returned by [`Transport`] methods.
pub type TransportFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// Connection provider for GATT reads.
///
/// Implementations may retry connection establishment internally.
pub trait Transport: Send + Sync {
    /// A live connection to one device.
    type Session: Send + Sync;

    fn connect(&self, address: MacAddress) -> TransportFuture<'_, Self::Session>;

    fn read_characteristic<'a>(
        &'a self,
        session: &'a Self::Session,
        uuid: Uuid,
    ) -> TransportFuture<'a, Vec<u8>>;

    /// Best effort release of the connection.
    fn disconnect(&self, session: Self::Session) -> TransportFuture<'_, ()>;
}

/// Poll the battery level of the device at `address`.
pub async fn poll<T: Transport>(
    transport: &T,
    address: MacAddress,
    policy: &RetryPolicy,
) -> ConnectionOutcome {
    match poll_or(transport, address, policy, future::pending::<Infallible>()).await {
        Ok(outcome) => outcome,
        Err(never) => match never {},
    }
}

/// Like [`poll`], but gives up when `cancel` completes.
///
/// If cancellation happens while connecting, nothing is held and the poll
/// returns at once. If it happens while reading, the connection is released
/// first and then [`Cancelled`] is returned.
pub async fn poll_until<T, C>(
    transport: &T,
    address: MacAddress,
    policy: &RetryPolicy,
    cancel: C,
) -> Result<ConnectionOutcome, Cancelled>
where
    T: Transport,
    C: Future<Output = ()>,
{
    poll_or(transport, address, policy, cancel)
        .await
        .map_err(|()| {
            debug!("Poll of {address} cancelled");
            Cancelled
        })
}

/// Run one poll, or stop with the output of `cancel` if it completes first.
async fn poll_or<T, C>(
    transport: &T,
    address: MacAddress,
    policy: &RetryPolicy,
    cancel: C,
) -> Result<ConnectionOutcome, C::Output>
where
    T: Transport,
    C: Future,
{
    tokio::pin!(cancel);
    debug!("Polling Walnut device {address}");

    let connected = tokio::select! {
        biased;
        stop = &mut cancel => return Err(stop),
        result = transport.connect(address) => result,
    };
    let session = match connected {
        Ok(session) => session,
        Err(error) => return Ok(log_outcome(address, ConnectionOutcome::from_error(error))),
    };

    let read = tokio::select! {
        biased;
        stop = &mut cancel => Err(stop),
        outcome = read_battery(transport, &session, policy) => Ok(outcome),
    };

    if let Err(error) = transport.disconnect(session).await {
        warn!("Failed to disconnect from {address}: {error}");
    }

    read.map(|outcome| log_outcome(address, outcome))
}

async fn read_battery<T: Transport>(
    transport: &T,
    session: &T::Session,
    policy: &RetryPolicy,
) -> ConnectionOutcome {
    let read = retry(policy, TransportError::is_transient, || {
        transport.read_characteristic(session, BATTERY_CHARACTERISTIC_UUID)
    })
    .await;

    match read {
        Retried::Ok(payload) => parse_battery(&payload),
        Retried::Exhausted { error, attempts } => {
            debug!("Battery read gave up after {attempts} attempt(s)");
            ConnectionOutcome::TransientFailure(error)
        }
        Retried::Fatal(error) => ConnectionOutcome::PermanentFailure(error),
    }
}

/// The Battery Level characteristic is a single unsigned byte in percent.
fn parse_battery(payload: &[u8]) -> ConnectionOutcome {
    match payload.first() {
        Some(&level) => {
            if level > 100 {
                debug!("Battery level {level} is above 100%");
            }
            ConnectionOutcome::Success(SensorReading::battery(level))
        }
        None => ConnectionOutcome::PermanentFailure(TransportError::Protocol(
            "empty battery level payload".to_string(),
        )),
    }
}

fn log_outcome(address: MacAddress, outcome: ConnectionOutcome) -> ConnectionOutcome {
    match &outcome {
        ConnectionOutcome::Success(reading) => {
            debug!("Read battery level from {address}: {reading}");
        }
        ConnectionOutcome::TransientFailure(error) => {
            warn!("Transient failure polling {address}: {error}");
        }
        ConnectionOutcome::PermanentFailure(error) => {
            warn!("Failed to poll {address}: {error}");
        }
    }
    outcome
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::test_utils::TEST_MAC;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    pub(crate) const NO_DELAY: RetryPolicy = RetryPolicy {
        max_attempts: 3,
        delay: Duration::ZERO,
    };

    /// Calls made against a [`FakeTransport`], in order.
    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum Call {
        Connect(MacAddress),
        Read(Uuid),
        Disconnect,
    }

    /// Scripted transport recording every call.
    #[derive(Debug, Default)]
    pub(crate) struct FakeTransport {
        pub(crate) connect: Mutex<VecDeque<Result<(), TransportError>>>,
        pub(crate) reads: Mutex<VecDeque<Result<Vec<u8>, TransportError>>>,
        pub(crate) disconnect_error: Option<TransportError>,
        /// Connects never complete when set.
        pub(crate) hang_connect: bool,
        /// Reads never complete when set.
        pub(crate) hang_reads: bool,
        pub(crate) calls: Mutex<Vec<Call>>,
    }

    impl FakeTransport {
        pub(crate) fn with_reads(reads: Vec<Result<Vec<u8>, TransportError>>) -> Self {
            Self {
                reads: Mutex::new(reads.into()),
                ..Default::default()
            }
        }

        fn failing_connect(error: TransportError) -> Self {
            Self {
                connect: Mutex::new(VecDeque::from([Err(error)])),
                ..Default::default()
            }
        }

        pub(crate) fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn count(&self, call: fn(&Call) -> bool) -> usize {
            self.calls().iter().filter(|c| call(c)).count()
        }

        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl Transport for FakeTransport {
        type Session = MacAddress;

        fn connect(&self, address: MacAddress) -> TransportFuture<'_, MacAddress> {
            self.record(Call::Connect(address));
            if self.hang_connect {
                return Box::pin(future::pending::<Result<MacAddress, TransportError>>());
            }
            let result = self.connect.lock().unwrap().pop_front().unwrap_or(Ok(()));
            Box::pin(async move { result.map(|()| address) })
        }

        fn read_characteristic<'a>(
            &'a self,
            _session: &'a MacAddress,
            uuid: Uuid,
        ) -> TransportFuture<'a, Vec<u8>> {
            self.record(Call::Read(uuid));
            if self.hang_reads {
                return Box::pin(future::pending::<Result<Vec<u8>, TransportError>>());
            }
            let result = self
                .reads
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Other("no scripted read".into())));
            Box::pin(async move { result })
        }

        fn disconnect(&self, _session: MacAddress) -> TransportFuture<'_, ()> {
            self.record(Call::Disconnect);
            let result = self.disconnect_error.clone().map_or(Ok(()), Err);
            Box::pin(async move { result })
        }
    }

    fn is_read(call: &Call) -> bool {
        matches!(call, Call::Read(_))
    }

    fn is_disconnect(call: &Call) -> bool {
        matches!(call, Call::Disconnect)
    }

    #[tokio::test]
    async fn test_successful_poll() {
        let transport = FakeTransport::with_reads(vec![Ok(vec![83])]);

        let outcome = poll(&transport, TEST_MAC, &NO_DELAY).await;

        assert_eq!(outcome, ConnectionOutcome::Success(SensorReading::battery(83)));
        assert_eq!(
            transport.calls(),
            vec![
                Call::Connect(TEST_MAC),
                Call::Read(BATTERY_CHARACTERISTIC_UUID),
                Call::Disconnect
            ]
        );
    }

    #[tokio::test]
    async fn test_only_first_byte_is_used() {
        let transport = FakeTransport::with_reads(vec![Ok(vec![0xC8, 0x01])]);
        let outcome = poll(&transport, TEST_MAC, &NO_DELAY).await;
        assert_eq!(outcome, ConnectionOutcome::Success(SensorReading::battery(200)));
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let transport = FakeTransport::with_reads(vec![
            Err(TransportError::Busy),
            Err(TransportError::ConnectionDropped("link loss".into())),
            Ok(vec![50]),
        ]);

        let outcome = poll(&transport, TEST_MAC, &NO_DELAY).await;

        assert_eq!(outcome, ConnectionOutcome::Success(SensorReading::battery(50)));
        assert_eq!(transport.count(is_read), 3);
        assert_eq!(transport.count(is_disconnect), 1);
    }

    #[tokio::test]
    async fn test_retry_bound_is_respected() {
        let transport = FakeTransport::with_reads(
            (0..10).map(|_| Err(TransportError::Busy)).collect(),
        );

        let outcome = poll(&transport, TEST_MAC, &NO_DELAY).await;

        assert_eq!(outcome, ConnectionOutcome::TransientFailure(TransportError::Busy));
        assert_eq!(transport.count(is_read), NO_DELAY.max_attempts as usize);
        assert_eq!(transport.count(is_disconnect), 1);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let unsupported = TransportError::UnsupportedCharacteristic(BATTERY_CHARACTERISTIC_UUID);
        let transport = FakeTransport::with_reads(vec![Err(unsupported.clone()), Ok(vec![10])]);

        let outcome = poll(&transport, TEST_MAC, &NO_DELAY).await;

        assert_eq!(outcome, ConnectionOutcome::PermanentFailure(unsupported));
        assert_eq!(transport.count(is_read), 1);
    }

    #[tokio::test]
    async fn test_disconnect_after_failed_read() {
        let transport =
            FakeTransport::with_reads(vec![Err(TransportError::AuthenticationFailed)]);

        let outcome = poll(&transport, TEST_MAC, &NO_DELAY).await;

        assert!(matches!(outcome, ConnectionOutcome::PermanentFailure(_)));
        assert_eq!(
            transport.calls().last(),
            Some(&Call::Disconnect),
            "disconnect must be the final call"
        );
        assert_eq!(transport.count(is_disconnect), 1);
    }

    #[tokio::test]
    async fn test_disconnect_error_does_not_mask_outcome() {
        let transport = FakeTransport {
            disconnect_error: Some(TransportError::Other("org.bluez.Error.Failed".into())),
            ..FakeTransport::with_reads(vec![Ok(vec![99])])
        };

        let outcome = poll(&transport, TEST_MAC, &NO_DELAY).await;

        assert_eq!(outcome, ConnectionOutcome::Success(SensorReading::battery(99)));
        assert_eq!(transport.count(is_disconnect), 1);
    }

    #[tokio::test]
    async fn test_empty_payload_is_protocol_violation() {
        let transport = FakeTransport::with_reads(vec![Ok(vec![])]);
        let outcome = poll(&transport, TEST_MAC, &NO_DELAY).await;
        assert!(matches!(
            outcome,
            ConnectionOutcome::PermanentFailure(TransportError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_failure_skips_read_and_disconnect() {
        let transport = FakeTransport::failing_connect(TransportError::DeviceNotFound);

        let outcome = poll(&transport, TEST_MAC, &NO_DELAY).await;

        assert_eq!(outcome, ConnectionOutcome::PermanentFailure(TransportError::DeviceNotFound));
        assert_eq!(transport.calls(), vec![Call::Connect(TEST_MAC)]);
    }

    #[tokio::test]
    async fn test_transient_connect_failure() {
        let transport =
            FakeTransport::failing_connect(TransportError::ConnectionDropped("timeout".into()));
        let outcome = poll(&transport, TEST_MAC, &NO_DELAY).await;
        assert!(matches!(outcome, ConnectionOutcome::TransientFailure(_)));
    }

    #[tokio::test]
    async fn test_cancel_during_read_still_disconnects() {
        let transport = FakeTransport {
            hang_reads: true,
            ..Default::default()
        };

        let result = poll_until(
            &transport,
            TEST_MAC,
            &NO_DELAY,
            tokio::time::sleep(Duration::from_millis(10)),
        )
        .await;

        assert_eq!(result, Err(Cancelled));
        assert_eq!(
            transport.calls(),
            vec![
                Call::Connect(TEST_MAC),
                Call::Read(BATTERY_CHARACTERISTIC_UUID),
                Call::Disconnect
            ]
        );
    }

    #[tokio::test]
    async fn test_cancel_during_connect_holds_nothing() {
        let transport = FakeTransport {
            hang_connect: true,
            ..Default::default()
        };

        let result = poll_until(
            &transport,
            TEST_MAC,
            &NO_DELAY,
            tokio::time::sleep(Duration::from_millis(10)),
        )
        .await;

        assert_eq!(result, Err(Cancelled));
        assert_eq!(transport.calls(), vec![Call::Connect(TEST_MAC)]);
    }

    #[tokio::test]
    async fn test_cancel_before_connect() {
        let transport = FakeTransport::with_reads(vec![Ok(vec![1])]);

        let result = poll_until(&transport, TEST_MAC, &NO_DELAY, future::ready(())).await;

        assert_eq!(result, Err(Cancelled));
        assert!(!transport.calls().contains(&Call::Disconnect));
    }

    #[test]
    fn test_transient_classification() {
        assert!(TransportError::Busy.is_transient());
        assert!(TransportError::ConnectionDropped(String::new()).is_transient());
        assert!(TransportError::CharacteristicUnavailable(String::new()).is_transient());
        assert!(!TransportError::DeviceNotFound.is_transient());
        assert!(!TransportError::AuthenticationFailed.is_transient());
        assert!(!TransportError::Protocol(String::new()).is_transient());
        assert!(
            !TransportError::UnsupportedCharacteristic(BATTERY_CHARACTERISTIC_UUID).is_transient()
        );
    }
}
