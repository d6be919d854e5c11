//! Discovery Loop
//!
//! Periodically scans for advertisements and resolves the address of every
//! role that does not have one yet. Scan failures only cost one cycle.

use crate::bridge::BridgeContext;
use crate::domain::models::BridgeEvent;
use crate::infrastructure::bluetooth::BleError;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Run until shutdown.
pub async fn run(ctx: Arc<BridgeContext>) {
    info!("Discovery loop started");

    loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            _ = scan_once(&ctx) => {}
        }

        tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            _ = tokio::time::sleep(ctx.timing.scan_interval()) => {}
        }
    }

    info!("Discovery loop stopped");
}

/// One scan cycle. Returns how many roles were newly resolved.
pub async fn scan_once(ctx: &BridgeContext) -> usize {
    if ctx.registry.unresolved_roles().is_empty() {
        trace!("All devices resolved, skipping scan");
        return 0;
    }

    info!("Scanning for missing BLE devices...");
    let limit = ctx.timing.scan_window() + ctx.timing.io_timeout();
    let scanned = match tokio::time::timeout(limit, ctx.transport.scan()).await {
        Ok(result) => result,
        Err(_) => Err(BleError::Timeout),
    };

    let advertisements = match scanned {
        Ok(found) => found,
        Err(e) => {
            warn!("Scan failed, retrying next cycle: {}", e);
            return 0;
        }
    };
    debug!("Scan returned {} devices", advertisements.len());

    let mut resolved = 0;
    for adv in advertisements {
        if ctx.registry.set_address(&adv.name, adv.address) {
            info!(role = %adv.name, address = %adv.address, "Found device");
            ctx.emit(BridgeEvent::AddressDiscovered {
                role: adv.name,
                address: adv.address,
            });
            resolved += 1;
        }
    }
    resolved
}
