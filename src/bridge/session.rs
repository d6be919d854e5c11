//! Session Manager
//!
//! One manager per glove role drives the connection state machine:
//!
//! ```text
//! WaitingAddress ──address──▶ Connecting ──ok──▶ Active
//!       ▲                         │                │
//!       └──── clear + backoff ◀───┴──── error ◀────┘
//! ```
//!
//! Any failure clears the registry address, so a stale address is never
//! retried; the manager waits for discovery to resolve the glove again.

use crate::bridge::command::CommandWriter;
use crate::bridge::telemetry::TelemetryReader;
use crate::bridge::{BridgeContext, SessionEnd};
use crate::domain::models::{BleAddress, BridgeEvent, SessionState, StopReason};
use crate::domain::settings::DeviceSettings;
use crate::infrastructure::bluetooth::{BleError, GattLink};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

pub struct SessionManager {
    ctx: Arc<BridgeContext>,
    role: String,
    /// Consecutive failed connects or sessions; reset once a session is active.
    failures: u32,
}

impl SessionManager {
    pub fn new(ctx: Arc<BridgeContext>, role: String) -> Self {
        Self {
            ctx,
            role,
            failures: 0,
        }
    }

    /// Drive the state machine until shutdown or a fatal configuration error.
    pub async fn run(mut self) -> StopReason {
        let device = match self.ctx.registry.entry(&self.role) {
            Some(entry) => entry.device.clone(),
            None => {
                error!(role = %self.role, "Role is not registered");
                return self.stop(StopReason::UnknownRole);
            }
        };

        let missing = self.missing_pipes(&device);
        if !missing.is_empty() {
            error!(
                role = %self.role,
                "Target pipes not found ({}), giving up on this device",
                missing.join(", ")
            );
            return self.stop(StopReason::MissingPipes(missing));
        }

        loop {
            let address = match self.wait_for_address().await {
                Some(address) => address,
                None => return self.stop(StopReason::Shutdown),
            };

            self.set_state(SessionState::Connecting);
            let connected = tokio::select! {
                _ = self.ctx.shutdown.cancelled() => return self.stop(StopReason::Shutdown),
                result = self.connect(address) => result,
            };

            match connected {
                Ok(link) => {
                    info!(role = %self.role, %address, "Connected");
                    self.failures = 0;
                    self.set_state(SessionState::Active);

                    let end = self.run_session(link, &device).await;
                    if end == SessionEnd::Shutdown {
                        return self.stop(StopReason::Shutdown);
                    }
                    warn!(role = %self.role, "Session ended ({}), reconnecting", end);
                }
                Err(e) => warn!(role = %self.role, %address, "Connection failed: {}", e),
            }

            // Abandon the address; discovery has to find the glove again
            self.ctx.registry.clear_address(&self.role);
            self.failures = self.failures.saturating_add(1);

            let delay = self.ctx.timing.backoff(self.failures);
            info!(role = %self.role, "Retrying in {:?}", delay);
            tokio::select! {
                _ = self.ctx.shutdown.cancelled() => return self.stop(StopReason::Shutdown),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn missing_pipes(&self, device: &DeviceSettings) -> Vec<String> {
        [&device.inbound_pipe, &device.outbound_pipe]
            .into_iter()
            .filter(|path| !self.ctx.pipes.exists(path))
            .cloned()
            .collect()
    }

    /// Poll the registry until an address shows up. `None` on shutdown.
    async fn wait_for_address(&self) -> Option<BleAddress> {
        self.set_state(SessionState::WaitingAddress);

        let mut announced = false;
        loop {
            if let Some(address) = self.ctx.registry.get_address(&self.role) {
                return Some(address);
            }
            if !announced {
                info!(role = %self.role, "Waiting for device to be discovered...");
                announced = true;
            }

            tokio::select! {
                _ = self.ctx.shutdown.cancelled() => return None,
                _ = tokio::time::sleep(self.ctx.timing.address_poll()) => {}
            }
        }
    }

    async fn connect(&self, address: BleAddress) -> Result<Arc<dyn GattLink>, BleError> {
        match tokio::time::timeout(
            self.ctx.timing.connect_timeout(),
            self.ctx.transport.connect(address),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(BleError::Timeout),
        }
    }

    /// Run reader and writer until the first one ends, then cancel the other
    /// and release the link.
    async fn run_session(&self, link: Arc<dyn GattLink>, device: &DeviceSettings) -> SessionEnd {
        let mut tasks = JoinSet::new();

        tasks.spawn(
            TelemetryReader {
                ctx: Arc::clone(&self.ctx),
                link: Arc::clone(&link),
                role: self.role.clone(),
                inbound_pipe: device.inbound_pipe.clone(),
            }
            .run(),
        );
        tasks.spawn(
            CommandWriter {
                ctx: Arc::clone(&self.ctx),
                link: Arc::clone(&link),
                role: self.role.clone(),
                outbound_pipe: device.outbound_pipe.clone(),
            }
            .run(),
        );

        let end = tokio::select! {
            _ = self.ctx.shutdown.cancelled() => SessionEnd::Shutdown,
            joined = tasks.join_next() => match joined {
                Some(Ok(end)) => end,
                Some(Err(e)) => SessionEnd::TaskFailed(e.to_string()),
                None => SessionEnd::TaskFailed("no data loops running".into()),
            },
        };

        // Both loops are gone before the link is closed
        tasks.shutdown().await;
        link.disconnect().await;
        end
    }

    fn set_state(&self, state: SessionState) {
        info!(role = %self.role, %state, "Session state");
        self.ctx.emit(BridgeEvent::StateChanged {
            role: self.role.clone(),
            state,
        });
    }

    fn stop(&self, reason: StopReason) -> StopReason {
        self.set_state(SessionState::Stopped);
        self.ctx.emit(BridgeEvent::Stopped {
            role: self.role.clone(),
            reason: reason.clone(),
        });
        reason
    }
}
