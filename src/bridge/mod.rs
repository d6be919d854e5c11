//! Bridge Core
//!
//! Wires the device registry, the BLE transport and the host pipes together.
//!
//! ```text
//!  discovery ──set──▶ DeviceRegistry ◀──get/clear── SessionManager (one per role)
//!                                                        │
//!                                          ┌─────────────┴─────────────┐
//!                                          ▼                           ▼
//!                                   telemetry reader            command writer
//!                                   (device ▶ pipe)             (pipe ▶ device)
//! ```
//!
//! Every loop observes the shared [`CancellationToken`] so Ctrl-C stops the
//! whole bridge, including active sessions, cleanly.

pub mod command;
pub mod discovery;
pub mod session;
pub mod telemetry;

use crate::domain::models::BridgeEvent;
use crate::domain::registry::DeviceRegistry;
use crate::domain::settings::{Settings, TimingSettings};
use crate::infrastructure::bluetooth::protocol::FrameError;
use crate::infrastructure::bluetooth::{BleError, BleTransport};
use crate::infrastructure::pipe::PipeChannels;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// GATT characteristics used by every glove.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Characteristics {
    /// Device to host frames.
    pub telemetry: Uuid,
    /// Host to device frames.
    pub command: Uuid,
}

/// Everything the discovery loop and the session managers share.
pub struct BridgeContext {
    pub registry: Arc<DeviceRegistry>,
    pub transport: Arc<dyn BleTransport>,
    pub pipes: Arc<dyn PipeChannels>,
    pub characteristics: Characteristics,
    pub timing: TimingSettings,
    pub events: mpsc::UnboundedSender<BridgeEvent>,
    pub shutdown: CancellationToken,
}

impl BridgeContext {
    pub fn new(
        settings: &Settings,
        registry: Arc<DeviceRegistry>,
        transport: Arc<dyn BleTransport>,
        pipes: Arc<dyn PipeChannels>,
        events: mpsc::UnboundedSender<BridgeEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            transport,
            pipes,
            characteristics: Characteristics {
                telemetry: settings.telemetry_char_uuid,
                command: settings.command_char_uuid,
            },
            timing: settings.timing.clone(),
            events,
            shutdown,
        }
    }

    /// Publish an event; a closed receiver is not an error.
    pub fn emit(&self, event: BridgeEvent) {
        let _ = self.events.send(event);
    }
}

/// Result of one attribute access, as seen by the data loops.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkOutcome<T> {
    Ok(T),
    Disconnected(BleError),
    Protocol(FrameError),
}

/// Why an active session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEnd {
    Disconnected(BleError),
    Protocol(FrameError),
    /// A data loop task died without reporting (panic or abort).
    TaskFailed(String),
    Shutdown,
}

impl std::fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected(e) => write!(f, "transport error: {}", e),
            Self::Protocol(e) => write!(f, "protocol error: {}", e),
            Self::TaskFailed(e) => write!(f, "data loop failed: {}", e),
            Self::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// Run discovery plus one session manager per registered role.
///
/// Returns after shutdown, or once every manager has given up on its role.
pub async fn run(ctx: Arc<BridgeContext>) {
    let mut managers = JoinSet::new();
    for role in ctx.registry.roles() {
        let manager = session::SessionManager::new(Arc::clone(&ctx), role.to_string());
        managers.spawn(manager.run());
    }
    let discovery = tokio::spawn(discovery::run(Arc::clone(&ctx)));

    info!("Bridge running for {} device roles", managers.len());

    while let Some(joined) = managers.join_next().await {
        match joined {
            Ok(reason) => info!("Session manager finished: {:?}", reason),
            Err(e) => error!("Session manager failed: {}", e),
        }
    }

    if !ctx.shutdown.is_cancelled() {
        warn!("No device sessions left, stopping discovery");
        ctx.shutdown.cancel();
    }
    if let Err(e) = discovery.await {
        error!("Discovery loop failed: {}", e);
    }

    info!("Bridge stopped");
}
