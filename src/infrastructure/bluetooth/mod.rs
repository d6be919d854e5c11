//! Bluetooth Module
//!
//! BLE access for the gloves, consumed by the bridge through two traits.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  bridge (discovery loop, session managers)   │
//! └───────────────┬──────────────────────────────┘
//!                 │ BleTransport / GattLink
//!         ┌───────┴────────┐
//!         ▼                ▼
//! ┌──────────────┐  ┌──────────────┐
//! │   Scanner    │  │  Connection  │   (WinRT, Windows only)
//! │ - advertise- │  │ - GATT       │
//! │   ment watch │  │   read/write │
//! └──────────────┘  └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - 12-byte frame codec and command line parsing
//! - `scanner` - BLE device discovery (Windows)
//! - `connection` - device connection and GATT characteristic access (Windows)

pub mod protocol;

#[cfg(windows)]
pub mod connection;
#[cfg(windows)]
pub mod scanner;

use crate::domain::models::{Advertisement, BleAddress};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BleError {
    #[error("scan failed: {0}")]
    Scan(String),
    #[error("connect to {address} failed: {reason}")]
    Connect { address: BleAddress, reason: String },
    #[error("operation timed out")]
    Timeout,
    #[error("device disconnected")]
    Disconnected,
    #[error("characteristic {0} not found")]
    CharacteristicNotFound(Uuid),
    #[error("GATT I/O error: {0}")]
    Io(String),
    #[error("bluetooth LE is not supported on this platform")]
    Unsupported,
}

#[cfg(windows)]
impl From<windows::core::Error> for BleError {
    fn from(e: windows::core::Error) -> Self {
        BleError::Io(e.message())
    }
}

/// Discovery and connection capability.
#[async_trait]
pub trait BleTransport: Send + Sync + 'static {
    /// One scan cycle; returns every named device seen.
    async fn scan(&self) -> Result<Vec<Advertisement>, BleError>;

    async fn connect(&self, address: BleAddress) -> Result<Arc<dyn GattLink>, BleError>;
}

/// A live connection to one device.
#[async_trait]
pub trait GattLink: Send + Sync {
    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>, BleError>;

    /// Write a value; `with_response` requires the device to acknowledge.
    async fn write(
        &self,
        characteristic: Uuid,
        data: &[u8],
        with_response: bool,
    ) -> Result<(), BleError>;

    /// Release the connection. Further calls on the link fail.
    async fn disconnect(&self);
}

/// Build the transport for this platform.
#[cfg(windows)]
pub fn platform_transport(scan_window: Duration) -> Result<Arc<dyn BleTransport>, BleError> {
    Ok(Arc::new(WinRtTransport::new(scan_window)))
}

#[cfg(not(windows))]
pub fn platform_transport(_scan_window: Duration) -> Result<Arc<dyn BleTransport>, BleError> {
    Err(BleError::Unsupported)
}

/// WinRT backed transport.
#[cfg(windows)]
pub struct WinRtTransport {
    scan_window: Duration,
}

#[cfg(windows)]
impl WinRtTransport {
    pub fn new(scan_window: Duration) -> Self {
        Self { scan_window }
    }
}

#[cfg(windows)]
#[async_trait]
impl BleTransport for WinRtTransport {
    async fn scan(&self) -> Result<Vec<Advertisement>, BleError> {
        scanner::BleScanner::new().scan_for(self.scan_window).await
    }

    async fn connect(&self, address: BleAddress) -> Result<Arc<dyn GattLink>, BleError> {
        let link = connection::BleConnection::connect(address).await?;
        Ok(Arc::new(link))
    }
}
