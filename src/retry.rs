//! Bounded retry for fallible async operations.

use log::debug;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Default number of attempts, including the first one.
pub const DEFAULT_ATTEMPTS: u32 = 3;

/// Default fixed pause between two attempts.
pub const DEFAULT_DELAY: Duration = Duration::from_millis(250);

/// How often and how patiently to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// Fixed pause between attempts. No backoff is applied.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_ATTEMPTS,
            delay: DEFAULT_DELAY,
        }
    }
}

/// Result of [`retry`].
#[derive(Debug, Clone, PartialEq)]
pub enum Retried<T, E> {
    Ok(T),
    /// Every attempt failed with a retryable error; holds the last one.
    Exhausted { error: E, attempts: u32 },
    /// An error the predicate rejected; no further attempts were made.
    Fatal(E),
}

/// Run `op` until it succeeds, fails with an error `is_retryable` rejects, or
/// the policy runs out of attempts.
pub async fn retry<T, E, Op, Fut, P>(
    policy: &RetryPolicy,
    is_retryable: P,
    mut op: Op,
) -> Retried<T, E>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Retried::Ok(value),
            Err(error) if !is_retryable(&error) => return Retried::Fatal(error),
            Err(error) if attempt >= max_attempts => {
                return Retried::Exhausted {
                    error,
                    attempts: attempt,
                };
            }
            Err(error) => {
                debug!("Attempt {attempt}/{max_attempts} failed, retrying: {error}");
                if !policy.delay.is_zero() {
                    tokio::time::sleep(policy.delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    const NO_DELAY: RetryPolicy = RetryPolicy {
        max_attempts: 3,
        delay: Duration::ZERO,
    };

    fn always(_: &String) -> bool {
        true
    }

    #[test]
    fn test_first_success_is_returned() {
        let calls = Cell::new(0);
        let result: Retried<u8, String> = tokio_test::block_on(retry(&NO_DELAY, always, || {
            calls.set(calls.get() + 1);
            async { Ok(7) }
        }));
        assert_eq!(result, Retried::Ok(7));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_succeeds_after_transient_errors() {
        let calls = Cell::new(0);
        let result = tokio_test::block_on(retry(&NO_DELAY, always, || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move {
                if n < 3 {
                    Err(format!("busy {n}"))
                } else {
                    Ok(n)
                }
            }
        }));
        assert_eq!(result, Retried::Ok(3));
    }

    #[test]
    fn test_exhaustion_keeps_last_error() {
        let calls = Cell::new(0);
        let result: Retried<(), String> = tokio_test::block_on(retry(&NO_DELAY, always, || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move { Err(format!("busy {n}")) }
        }));
        assert_eq!(
            result,
            Retried::Exhausted {
                error: "busy 3".to_string(),
                attempts: 3
            }
        );
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_fatal_error_stops_immediately() {
        let calls = Cell::new(0);
        let result: Retried<(), String> = tokio_test::block_on(retry(
            &NO_DELAY,
            |e: &String| e != "fatal",
            || {
                calls.set(calls.get() + 1);
                async { Err("fatal".to_string()) }
            },
        ));
        assert_eq!(result, Retried::Fatal("fatal".to_string()));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_zero_attempts_runs_once() {
        let policy = RetryPolicy {
            max_attempts: 0,
            delay: Duration::ZERO,
        };
        let calls = Cell::new(0);
        let result: Retried<(), String> = tokio_test::block_on(retry(&policy, always, || {
            calls.set(calls.get() + 1);
            async { Err("busy".to_string()) }
        }));
        assert!(matches!(result, Retried::Exhausted { attempts: 1, .. }));
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn test_delay_between_attempts() {
        let policy = RetryPolicy {
            max_attempts: 2,
            delay: Duration::from_millis(20),
        };
        let started = std::time::Instant::now();
        let result: Retried<(), String> =
            retry(&policy, always, || async { Err("busy".to_string()) }).await;
        assert!(matches!(result, Retried::Exhausted { attempts: 2, .. }));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }
}
