use crate::infrastructure::bluetooth::protocol::TelemetryFrame;
use std::fmt;
use std::str::FromStr;

/// 48-bit Bluetooth device address.
///
/// Stored as the raw `u64` WinRT hands out; displayed as `AA:BB:CC:DD:EE:FF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BleAddress(u64);

impl BleAddress {
    pub const MAX: u64 = 0xFFFF_FFFF_FFFF;

    /// Returns `None` for zero or values wider than 48 bits.
    pub fn new(raw: u64) -> Option<Self> {
        if raw == 0 || raw > Self::MAX {
            None
        } else {
            Some(Self(raw))
        }
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BleAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0.to_be_bytes();
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[2], b[3], b[4], b[5], b[6], b[7]
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid bluetooth address: {0:?}")]
pub struct AddressParseError(pub String);

impl FromStr for BleAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || AddressParseError(s.to_string());
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(err());
        }

        let mut raw = 0u64;
        for part in parts {
            if part.len() != 2 {
                return Err(err());
            }
            let byte = u8::from_str_radix(part, 16).map_err(|_| err())?;
            raw = (raw << 8) | byte as u64;
        }

        Self::new(raw).ok_or_else(err)
    }
}

/// One advertisement seen during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub name: String,
    pub address: BleAddress,
}

/// Session manager state for one device role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    WaitingAddress,
    Connecting,
    Active,
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::WaitingAddress => "waiting for address",
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Why a session manager gave up on its role for good.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// One or both pipe paths are absent.
    MissingPipes(Vec<String>),
    /// The role was never registered.
    UnknownRole,
    Shutdown,
}

/// Events published by the bridge core.
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    AddressDiscovered { role: String, address: BleAddress },
    StateChanged { role: String, state: SessionState },
    Telemetry { role: String, frame: TelemetryFrame },
    CommandSent { role: String, frame: TelemetryFrame },
    Stopped { role: String, reason: StopReason },
}
