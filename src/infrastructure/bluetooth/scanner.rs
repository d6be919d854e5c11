//! BLE Scanner Module
//!
//! Runs an advertisement watcher for a fixed window and reports every named
//! device it heard.

use crate::domain::models::{Advertisement, BleAddress};
use crate::infrastructure::bluetooth::BleError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, trace};
use windows::Devices::Bluetooth::Advertisement::{
    BluetoothLEAdvertisementReceivedEventArgs, BluetoothLEAdvertisementWatcher,
    BluetoothLEScanningMode,
};
use windows::Foundation::TypedEventHandler;

/// BLE Scanner for discovering gloves by advertised name
pub struct BleScanner {
    watcher: Option<BluetoothLEAdvertisementWatcher>,
}

impl BleScanner {
    pub fn new() -> Self {
        Self { watcher: None }
    }

    /// Listen for advertisements for `window`, then stop.
    pub async fn scan_for(mut self, window: Duration) -> Result<Vec<Advertisement>, BleError> {
        let seen: Arc<Mutex<HashMap<u64, String>>> = Arc::default();
        self.start(Arc::clone(&seen))
            .map_err(|e| BleError::Scan(e.message()))?;

        tokio::time::sleep(window).await;
        self.stop().map_err(|e| BleError::Scan(e.message()))?;

        let seen = seen
            .lock()
            .map_err(|_| BleError::Scan("advertisement table poisoned".into()))?;
        let found: Vec<Advertisement> = seen
            .iter()
            .filter_map(|(raw, name)| {
                BleAddress::new(*raw).map(|address| Advertisement {
                    name: name.clone(),
                    address,
                })
            })
            .collect();

        debug!("Scan finished, {} named devices seen", found.len());
        Ok(found)
    }

    fn start(&mut self, seen: Arc<Mutex<HashMap<u64, String>>>) -> windows::core::Result<()> {
        // Stop any existing scan
        self.stop()?;

        let watcher = BluetoothLEAdvertisementWatcher::new()?;
        // Active scanning so scan responses carrying the local name are delivered
        watcher.SetScanningMode(BluetoothLEScanningMode::Active)?;

        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<BluetoothLEAdvertisementWatcher>,
                  args: windows::core::Ref<BluetoothLEAdvertisementReceivedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let name = args.Advertisement()?.LocalName()?.to_string();
                    if name.is_empty() {
                        return Ok(());
                    }
                    let address = args.BluetoothAddress()?;
                    trace!("Advertisement from {:#X}: {}", address, name);
                    if let Ok(mut seen) = seen.lock() {
                        seen.insert(address, name);
                    }
                }
                Ok(())
            },
        );

        watcher.Received(&handler)?;
        watcher.Start()?;
        self.watcher = Some(watcher);

        Ok(())
    }

    fn stop(&mut self) -> windows::core::Result<()> {
        if let Some(watcher) = self.watcher.take() {
            watcher.Stop()?;
        }
        Ok(())
    }
}

impl Drop for BleScanner {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
