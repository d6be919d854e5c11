mod bridge;
mod domain;
mod infrastructure;
#[cfg(test)]
mod testing;

use anyhow::Context;
use bridge::BridgeContext;
use domain::models::BridgeEvent;
use domain::registry::DeviceRegistry;
use domain::settings::{SettingsService, CONFIG_ENV};
use infrastructure::bluetooth::platform_transport;
use infrastructure::logging::init_logger;
use infrastructure::pipe::LocalPipes;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Settings path from the first argument, then the environment.
fn config_override() -> Option<PathBuf> {
    std::env::args_os()
        .nth(1)
        .or_else(|| std::env::var_os(CONFIG_ENV))
        .map(PathBuf::from)
}

fn log_event(event: &BridgeEvent) {
    match event {
        BridgeEvent::Telemetry { role, frame } => debug!(%role, "Telemetry {}", frame),
        BridgeEvent::CommandSent { role, frame } => debug!(%role, "Command {}", frame),
        BridgeEvent::Stopped { role, reason } => warn!(%role, "Device stopped: {:?}", reason),
        other => debug!("{:?}", other),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::new(config_override())?;
    let settings = settings_service.get().clone();

    let _log_guard = init_logger(&settings.log_settings)?;
    info!("Starting Glove Bridge");
    if settings_service.wrote_defaults() {
        info!(path = %settings_service.path().display(), "Wrote default settings");
    }
    for warning in settings_service.load_warnings() {
        warn!("{}", warning);
    }
    info!(path = %settings_service.path().display(), "Settings loaded");

    let transport = platform_transport(settings.timing.scan_window())
        .context("no BLE backend available")?;
    let registry = Arc::new(
        DeviceRegistry::from_devices(&settings.devices).context("building device registry")?,
    );

    let shutdown = CancellationToken::new();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    let ctx = Arc::new(BridgeContext::new(
        &settings,
        registry,
        transport,
        Arc::new(LocalPipes),
        event_tx,
        shutdown.clone(),
    ));

    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            log_event(&event);
        }
    });

    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, shutting down");
                ctrl_c.cancel();
            }
            Err(e) => warn!("Could not listen for Ctrl-C: {}", e),
        }
    });

    bridge::run(ctx).await;
    Ok(())
}
