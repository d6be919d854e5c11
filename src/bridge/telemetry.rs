//! Telemetry Reader
//!
//! Pulls frames from the glove's telemetry characteristic and forwards them to
//! the host's inbound pipe as text lines.

use crate::bridge::{BridgeContext, LinkOutcome, SessionEnd};
use crate::domain::models::BridgeEvent;
use crate::infrastructure::bluetooth::protocol::TelemetryFrame;
use crate::infrastructure::bluetooth::{BleError, GattLink};
use crate::infrastructure::pipe::PipeChannels;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Read and decode one frame, bounded by `limit`.
pub async fn read_frame(
    link: &dyn GattLink,
    characteristic: Uuid,
    limit: Duration,
) -> LinkOutcome<TelemetryFrame> {
    let bytes = match tokio::time::timeout(limit, link.read(characteristic)).await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => return LinkOutcome::Disconnected(e),
        Err(_) => return LinkOutcome::Disconnected(BleError::Timeout),
    };

    match TelemetryFrame::decode(&bytes) {
        Ok(frame) => LinkOutcome::Ok(frame),
        Err(e) => LinkOutcome::Protocol(e),
    }
}

/// Write one frame as a line to `path`. The pipe is opened for this line only.
///
/// Only the open is bounded by `limit`; once connected the line is written out
/// in full so the host never sees a torn line.
pub async fn forward_frame(
    pipes: &dyn PipeChannels,
    path: &str,
    frame: &TelemetryFrame,
    limit: Duration,
) -> io::Result<()> {
    let mut sink = tokio::time::timeout(limit, pipes.open_write(path))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "pipe open timed out"))??;
    sink.write_line(&frame.to_line()).await
}

pub struct TelemetryReader {
    pub ctx: Arc<BridgeContext>,
    pub link: Arc<dyn GattLink>,
    pub role: String,
    pub inbound_pipe: String,
}

impl TelemetryReader {
    /// Loop until the link fails. Pipe trouble only skips the current frame.
    pub async fn run(self) -> SessionEnd {
        let timing = &self.ctx.timing;

        loop {
            let frame = match read_frame(
                self.link.as_ref(),
                self.ctx.characteristics.telemetry,
                timing.io_timeout(),
            )
            .await
            {
                LinkOutcome::Ok(frame) => frame,
                LinkOutcome::Disconnected(e) => {
                    warn!(role = %self.role, "Disconnected during read: {}", e);
                    return SessionEnd::Disconnected(e);
                }
                LinkOutcome::Protocol(e) => {
                    warn!(role = %self.role, "Malformed telemetry: {}", e);
                    return SessionEnd::Protocol(e);
                }
            };

            debug!(role = %self.role, "Received {}", frame);

            match forward_frame(
                self.ctx.pipes.as_ref(),
                &self.inbound_pipe,
                &frame,
                timing.io_timeout(),
            )
            .await
            {
                Ok(()) => self.ctx.emit(BridgeEvent::Telemetry {
                    role: self.role.clone(),
                    frame,
                }),
                Err(e) => warn!(
                    role = %self.role,
                    pipe = %self.inbound_pipe,
                    "Could not deliver telemetry: {}", e
                ),
            }

            tokio::time::sleep(timing.pacing()).await;
        }
    }
}
