//! Glove Wire Protocol
//!
//! The glove exposes a Nordic-UART style pair of characteristics. Both
//! directions carry the same 12-byte little-endian record.
//!
//! ```text
//! [0-3]  : axis0 (f32 little-endian, finger curl)
//! [4-7]  : axis1 (f32 little-endian, finger curl)
//! [8-11] : flags (u32 little-endian, status bitmask)
//! ```

use std::fmt;
use tracing::trace;

/// Size of one frame on the wire.
pub const FRAME_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame size: {0} (expected 12)")]
    InvalidLength(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandParseError {
    #[error("expected 2 comma-separated values, got {0}")]
    FieldCount(usize),
    #[error("not a number: {0:?}")]
    InvalidNumber(String),
}

/// One telemetry or command record.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TelemetryFrame {
    pub axis0: f32,
    pub axis1: f32,
    pub flags: u32,
}

impl TelemetryFrame {
    pub fn new(axis0: f32, axis1: f32, flags: u32) -> Self {
        Self {
            axis0,
            axis1,
            flags,
        }
    }

    /// Decode a raw characteristic value.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        let bytes: &[u8; FRAME_LEN] = bytes
            .try_into()
            .map_err(|_| FrameError::InvalidLength(bytes.len()))?;

        trace!("Raw frame: {:02X?}", bytes);

        Ok(Self {
            axis0: f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            axis1: f32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            flags: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        })
    }

    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let mut out = [0u8; FRAME_LEN];
        out[0..4].copy_from_slice(&self.axis0.to_le_bytes());
        out[4..8].copy_from_slice(&self.axis1.to_le_bytes());
        out[8..12].copy_from_slice(&self.flags.to_le_bytes());
        out
    }

    /// Text line handed to the host application, e.g. `(1.0, 2.0, 1)`.
    pub fn to_line(&self) -> String {
        self.to_string()
    }
}

/// Shortest round-trip text of the widened value, with the host's spelling of
/// exponents (`1e+16`, `1e-07`) and non-finite values (`nan`, `inf`).
fn float_text(value: f32) -> String {
    let value = f64::from(value);
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    let text = format!("{:?}", value);
    match text.split_once('e') {
        Some((mantissa, exponent)) => {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exponent),
            };
            format!("{}e{}{:0>2}", mantissa, sign, digits)
        }
        None => text,
    }
}

impl fmt::Display for TelemetryFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {})",
            float_text(self.axis0),
            float_text(self.axis1),
            self.flags
        )
    }
}

/// Parse one command line from the host (`"0.5,1.5"`).
///
/// Returns `Ok(None)` for blank lines. The flags field carries the bit pattern
/// of the second value.
pub fn parse_command_line(line: &str) -> Result<Option<TelemetryFrame>, CommandParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != 2 {
        return Err(CommandParseError::FieldCount(fields.len()));
    }

    let parse = |s: &str| {
        s.parse::<f32>()
            .map_err(|_| CommandParseError::InvalidNumber(s.to_string()))
    };
    let axis0 = parse(fields[0])?;
    let axis1 = parse(fields[1])?;

    Ok(Some(TelemetryFrame::new(axis0, axis1, axis1.to_bits())))
}
