//! Advertisement source for Walnut devices.
//!
//! The scanner only delivers [`RawFrame`]s; deciding what a frame means is
//! left to [`crate::device`] and [`crate::app`].

#[cfg(feature = "bluer")]
pub mod bluer;

use crate::device::RawFrame;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::mpsc;

/// Error type for scanner operations.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    /// No scanning backend compiled in
    #[allow(dead_code)]
    #[error("no scanner backend available (built without the `bluer` feature)")]
    BackendNotAvailable,
}

/// Channel buffer size for advertisement frames.
pub const FRAME_CHANNEL_BUFFER_SIZE: usize = 100;

/// Frame source abstraction to enable deterministic tests without Bluetooth hardware.
pub trait Scanner: Send + Sync {
    fn start_scan(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<RawFrame>, ScanError>> + Send + '_>>;
}

/// Scanner that delegates to the compiled-in backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealScanner;

impl Scanner for RealScanner {
    fn start_scan(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<RawFrame>, ScanError>> + Send + '_>>
    {
        Box::pin(async move {
            #[cfg(feature = "bluer")]
            return bluer::start_scan().await;
            #[cfg(not(feature = "bluer"))]
            return Err(ScanError::BackendNotAvailable);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_error_display() {
        let err = ScanError::Bluetooth("adapter not powered".to_string());
        assert_eq!(err.to_string(), "Bluetooth error: adapter not powered");
    }
}
