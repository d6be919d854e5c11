//! Command Writer
//!
//! Reads command lines from the host's outbound pipe, encodes them as frames
//! and writes them to the glove with acknowledgement required.

use crate::bridge::{BridgeContext, LinkOutcome, SessionEnd};
use crate::domain::models::BridgeEvent;
use crate::infrastructure::bluetooth::protocol::{parse_command_line, TelemetryFrame};
use crate::infrastructure::bluetooth::{BleError, GattLink};
use crate::infrastructure::pipe::PipeChannels;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Write one encoded frame, bounded by `limit`.
pub async fn write_frame(
    link: &dyn GattLink,
    characteristic: Uuid,
    frame: &TelemetryFrame,
    limit: Duration,
) -> LinkOutcome<()> {
    let bytes = frame.encode();
    match tokio::time::timeout(limit, link.write(characteristic, &bytes, true)).await {
        Ok(Ok(())) => LinkOutcome::Ok(()),
        Ok(Err(e)) => LinkOutcome::Disconnected(e),
        Err(_) => LinkOutcome::Disconnected(BleError::Timeout),
    }
}

/// Open `path`, read one line and close it again. Blocks until a line or EOF.
pub async fn next_line(pipes: &dyn PipeChannels, path: &str) -> io::Result<Option<String>> {
    let mut source = pipes.open_read(path).await?;
    source.read_line().await
}

pub struct CommandWriter {
    pub ctx: Arc<BridgeContext>,
    pub link: Arc<dyn GattLink>,
    pub role: String,
    pub outbound_pipe: String,
}

impl CommandWriter {
    /// Loop until the link fails. Bad lines and pipe trouble are skipped.
    pub async fn run(self) -> SessionEnd {
        let timing = &self.ctx.timing;

        loop {
            match next_line(self.ctx.pipes.as_ref(), &self.outbound_pipe).await {
                Ok(Some(line)) => {
                    if let Some(end) = self.handle_line(&line).await {
                        return end;
                    }
                }
                Ok(None) => debug!(role = %self.role, "No command pending"),
                Err(e) => warn!(
                    role = %self.role,
                    pipe = %self.outbound_pipe,
                    "Could not read command: {}", e
                ),
            }

            tokio::time::sleep(timing.pacing()).await;
        }
    }

    async fn handle_line(&self, line: &str) -> Option<SessionEnd> {
        let frame = match parse_command_line(line) {
            Ok(Some(frame)) => frame,
            Ok(None) => return None,
            Err(e) => {
                warn!(role = %self.role, "Skipping command {:?}: {}", line, e);
                return None;
            }
        };

        match write_frame(
            self.link.as_ref(),
            self.ctx.characteristics.command,
            &frame,
            self.ctx.timing.io_timeout(),
        )
        .await
        {
            LinkOutcome::Ok(()) => {
                info!(role = %self.role, "Sent {}", frame);
                self.ctx.emit(BridgeEvent::CommandSent {
                    role: self.role.clone(),
                    frame,
                });
                None
            }
            LinkOutcome::Disconnected(e) => {
                warn!(role = %self.role, "Disconnected during write: {}", e);
                Some(SessionEnd::Disconnected(e))
            }
            LinkOutcome::Protocol(e) => Some(SessionEnd::Protocol(e)),
        }
    }
}
