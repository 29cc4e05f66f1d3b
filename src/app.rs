//! Core application runner for `walnut-listener`.
//!
//! Decoupled from CLI parsing and process setup so it can be driven by a fake
//! scanner and a fake transport in tests.

use crate::alias::{Alias, AliasMap};
use crate::device::{DeviceSnapshot, DeviceState, RawFrame};
use crate::mac_address::MacAddress;
use crate::output::OutputFormatter;
use crate::output::influxdb::InfluxDbFormatter;
use crate::poll::{PollPolicy, parse_duration};
use crate::retry::RetryPolicy;
use crate::scanner::{ScanError, Scanner};
use crate::session::{self, Cancelled, ConnectionOutcome, Transport, TransportError};
use clap::Parser;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use log::{debug, info};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::io;
use std::io::Write;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;

/// Configuration for the run loop.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Only track the Walnut device with this address.
    /// Without it, every device advertising the Walnut service is tracked.
    #[arg(long)]
    pub address: Option<MacAddress>,

    /// Minimum time between two battery polls of the same device.
    /// Accepts duration with suffix: 10s, 1m, 500ms, 2h.
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    pub poll_interval: Duration,

    /// Attempts for one battery read before giving up until the next poll.
    #[arg(long, default_value_t = crate::retry::DEFAULT_ATTEMPTS)]
    pub read_attempts: u32,

    /// Pause between two battery read attempts.
    #[arg(long, default_value = "250ms", value_parser = parse_duration)]
    pub retry_delay: Duration,

    /// Specify human-readable alias for a Walnut device.
    /// Format: --alias DE:AD:BE:EF:00:00=Greenhouse
    #[arg(long = "alias", value_parser = crate::alias::parse_alias, value_name = "ALIAS")]
    pub aliases: Vec<Alias>,

    /// The name of the measurement in InfluxDB line protocol.
    #[arg(long, default_value = "walnut")]
    pub influxdb_measurement: String,

    /// Verbose output, log decoding and polling details
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl Options {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.read_attempts,
            delay: self.retry_delay,
        }
    }
}

/// Errors returned by the run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result of handling one advertisement.
#[derive(Debug, Clone)]
pub struct FrameUpdate {
    /// Device state with the advertisement applied.
    pub snapshot: DeviceSnapshot,
    /// A battery poll should be started. The device counts as being polled
    /// until [`Coordinator::finish_poll`] or [`Coordinator::abandon_poll`].
    pub poll_due: bool,
}

/// Schedules work for every tracked device.
///
/// Owns one [`DeviceState`] per address. Advertisements and poll results are
/// applied in the order the run loop hands them over, and at most one poll
/// per device is in flight at a time.
#[derive(Debug)]
pub struct Coordinator {
    address: Option<MacAddress>,
    poll_policy: PollPolicy,
    devices: HashMap<MacAddress, DeviceState>,
    polling: HashSet<MacAddress>,
}

impl Coordinator {
    pub fn new(address: Option<MacAddress>, poll_policy: PollPolicy) -> Self {
        Self {
            address,
            poll_policy,
            devices: HashMap::new(),
            polling: HashSet::new(),
        }
    }

    pub fn device(&self, address: &MacAddress) -> Option<&DeviceState> {
        self.devices.get(address)
    }

    pub fn is_polling(&self, address: &MacAddress) -> bool {
        self.polling.contains(address)
    }

    /// Handle one frame observed at `now`.
    ///
    /// Returns `None` when the frame was ignored.
    pub fn handle_frame(&mut self, frame: &RawFrame, now: Instant) -> Option<FrameUpdate> {
        if frame.walnut_payload().is_none() {
            debug!("No Walnut manufacturer data from {}, skipping", frame.address);
            return None;
        }

        if !self.devices.contains_key(&frame.address) {
            if !self.accepts(frame) {
                return None;
            }
            info!("Tracking Walnut device {}", frame.address);
        }
        let state = self
            .devices
            .entry(frame.address)
            .or_insert_with(|| DeviceState::new(frame.address));

        state.apply_advertisement(frame);

        let poll_due = frame.connectable
            && !self.polling.contains(&frame.address)
            && self.poll_policy.should_poll(state.last_poll(), now);
        if poll_due {
            state.record_poll(now);
            self.polling.insert(frame.address);
        }

        Some(FrameUpdate {
            snapshot: state.snapshot(),
            poll_due,
        })
    }

    /// Merge the outcome of a finished poll.
    ///
    /// Returns the updated snapshot when the poll produced a battery reading.
    pub fn finish_poll(
        &mut self,
        address: MacAddress,
        outcome: &ConnectionOutcome,
    ) -> Option<DeviceSnapshot> {
        self.polling.remove(&address);
        let state = self.devices.get_mut(&address)?;
        state.apply_poll_result(outcome);
        match outcome {
            ConnectionOutcome::Success(_) => Some(state.snapshot()),
            _ => None,
        }
    }

    /// Forget a poll that was cancelled before it produced an outcome.
    pub fn abandon_poll(&mut self, address: &MacAddress) {
        self.polling.remove(address);
    }

    fn accepts(&self, frame: &RawFrame) -> bool {
        match self.address {
            Some(address) => frame.address == address,
            None => frame.is_walnut_device(),
        }
    }
}

fn write_snapshot(
    formatter: &dyn OutputFormatter,
    snapshot: &DeviceSnapshot,
    aliases: &AliasMap,
    out: &mut dyn Write,
) -> io::Result<()> {
    let name = crate::alias::resolve_name(&snapshot.address, &snapshot.name, aliases);
    writeln!(out, "{}", formatter.format(snapshot, name))
}

async fn poll_device<T: Transport>(
    transport: &T,
    address: MacAddress,
    policy: &RetryPolicy,
    mut stop: watch::Receiver<bool>,
) -> (MacAddress, Result<ConnectionOutcome, Cancelled>) {
    let cancel = async move {
        // a dropped sender counts as a stop request
        let _ = stop.wait_for(|&stopping| stopping).await;
    };
    (address, session::poll_until(transport, address, policy, cancel).await)
}

/// Run the processing loop, writing one line per device update to `out`.
///
/// Advertisements are written as they arrive. Battery polls run concurrently
/// next to the frame loop and write a second line once they read a level.
/// The loop ends when the scanner stops and all polls are done, or when
/// `shutdown` completes; in that case running polls are cancelled and their
/// connections released first.
pub async fn run_with_io<T, S>(
    options: Options,
    scanner: &dyn Scanner,
    transport: &T,
    out: &mut dyn Write,
    shutdown: S,
) -> Result<(), RunError>
where
    T: Transport,
    S: Future<Output = ()>,
{
    let aliases = crate::alias::to_map(&options.aliases);
    let formatter = InfluxDbFormatter::new(options.influxdb_measurement.clone());
    let retry_policy = options.retry_policy();
    let mut coordinator =
        Coordinator::new(options.address, PollPolicy::new(options.poll_interval));
    let (stop_tx, stop_rx) = watch::channel(false);
    let mut polls = FuturesUnordered::new();
    tokio::pin!(shutdown);

    let mut frames = scanner.start_scan().await?;
    let mut scanning = true;
    let mut stopping = false;

    while scanning || !polls.is_empty() {
        tokio::select! {
            biased;
            _ = &mut shutdown, if !stopping => {
                info!("Shutting down, cancelling {} running poll(s)", polls.len());
                stopping = true;
                scanning = false;
                let _ = stop_tx.send(true);
            }
            Some((address, result)) = polls.next(), if !polls.is_empty() => match result {
                Ok(outcome) => {
                    if let Some(snapshot) = coordinator.finish_poll(address, &outcome) {
                        write_snapshot(&formatter, &snapshot, &aliases, out)?;
                    }
                }
                Err(Cancelled) => coordinator.abandon_poll(&address),
            },
            frame = frames.recv(), if scanning => match frame {
                Some(frame) => {
                    if let Some(update) = coordinator.handle_frame(&frame, Instant::now()) {
                        write_snapshot(&formatter, &update.snapshot, &aliases, out)?;
                        if update.poll_due {
                            let stop = stop_rx.clone();
                            polls.push(poll_device(transport, frame.address, &retry_policy, stop));
                        }
                    }
                }
                None => scanning = false,
            },
        }
    }

    Ok(())
}
