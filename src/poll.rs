//! Deciding when a Walnut device should be actively polled.
//!
//! Advertisements are free, a GATT connection is not. The policy allows one
//! poll per device as soon as it is seen, then at most one per `interval`.

use std::time::{Duration, Instant};

/// Default minimum time between two polls of the same device.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Poll-necessity decision.
///
/// The policy holds no per-device state: the caller passes in the time of
/// the last poll it recorded for the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl PollPolicy {
    /// Create a policy polling at most once per `interval`.
    ///
    /// # Example
    /// ```
    /// use std::time::{Duration, Instant};
    /// use walnut_listener::poll::PollPolicy;
    ///
    /// let policy = PollPolicy::new(Duration::from_secs(30));
    /// assert!(policy.should_poll(None, Instant::now()));
    /// ```
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether a poll is warranted at `now`.
    ///
    /// A device that was never polled is always polled. Otherwise the elapsed
    /// time since `last_poll` must strictly exceed the interval. A `true`
    /// result is necessary but not sufficient: the caller still needs a
    /// connectable device.
    pub fn should_poll(&self, last_poll: Option<Instant>, now: Instant) -> bool {
        match last_poll {
            None => true,
            Some(last) => now.saturating_duration_since(last) > self.interval,
        }
    }
}

/// Parse a duration from a human-readable string.
///
/// Supports the following suffixes:
/// - `s` or no suffix: seconds
/// - `m`: minutes
/// - `h`: hours
/// - `ms`: milliseconds
///
/// # Examples
/// ```
/// use walnut_listener::poll::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
/// assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
/// assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();

    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    let parse = |num: &str, unit: &str| -> Result<u64, String> {
        num.trim()
            .parse()
            .map_err(|_| format!("invalid {unit}: {num}"))
    };

    let scaled = |num: &str, unit: &str, factor: u64| -> Result<Duration, String> {
        parse(num, unit)?
            .checked_mul(factor)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("{unit} out of range: {}", num.trim()))
    };

    // "ms" must be checked before "m" and "s"
    if let Some(num) = src.strip_suffix("ms") {
        return Ok(Duration::from_millis(parse(num, "milliseconds")?));
    }
    if let Some(num) = src.strip_suffix('h') {
        return scaled(num, "hours", 3600);
    }
    if let Some(num) = src.strip_suffix('m') {
        return scaled(num, "minutes", 60);
    }
    if let Some(num) = src.strip_suffix('s') {
        return Ok(Duration::from_secs(parse(num, "seconds")?));
    }

    Ok(Duration::from_secs(parse(src, "duration")?))
}
