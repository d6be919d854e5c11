//! Device Registry
//!
//! Static table of known glove roles. Each role owns one atomic address slot:
//! discovery fills it only while it is empty, the session manager clears it
//! unconditionally when a connection goes bad.

use crate::domain::models::BleAddress;
use crate::domain::settings::DeviceSettings;
use std::sync::atomic::{AtomicU64, Ordering};

/// Slot value meaning "no address resolved".
const UNSET: u64 = 0;

/// Lock-free optional address cell.
#[derive(Debug, Default)]
pub struct AddressSlot(AtomicU64);

impl AddressSlot {
    pub fn get(&self) -> Option<BleAddress> {
        BleAddress::new(self.0.load(Ordering::Acquire))
    }

    /// Store `address` only if the slot is empty. Returns true if it was stored.
    pub fn set_if_unset(&self, address: BleAddress) -> bool {
        self.0
            .compare_exchange(UNSET, address.as_u64(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Empty the slot, returning what was there.
    pub fn clear(&self) -> Option<BleAddress> {
        BleAddress::new(self.0.swap(UNSET, Ordering::AcqRel))
    }
}

#[derive(Debug)]
pub struct DeviceEntry {
    pub device: DeviceSettings,
    address: AddressSlot,
}

impl DeviceEntry {
    pub fn role(&self) -> &str {
        &self.device.role
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("device role already registered: {0}")]
pub struct DuplicateRole(pub String);

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    entries: Vec<DeviceEntry>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_devices<'a>(
        devices: impl IntoIterator<Item = &'a DeviceSettings>,
    ) -> Result<Self, DuplicateRole> {
        let mut registry = Self::new();
        for device in devices {
            registry.register(device.clone())?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, device: DeviceSettings) -> Result<(), DuplicateRole> {
        if self.entry(&device.role).is_some() {
            return Err(DuplicateRole(device.role));
        }
        self.entries.push(DeviceEntry {
            device,
            address: AddressSlot::default(),
        });
        Ok(())
    }

    pub fn entry(&self, role: &str) -> Option<&DeviceEntry> {
        self.entries.iter().find(|e| e.device.role == role)
    }

    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.role())
    }

    pub fn get_address(&self, role: &str) -> Option<BleAddress> {
        self.entry(role).and_then(|e| e.address.get())
    }

    /// Discovery write: only lands if the role is known and currently unresolved.
    pub fn set_address(&self, role: &str, address: BleAddress) -> bool {
        self.entry(role)
            .map(|e| e.address.set_if_unset(address))
            .unwrap_or(false)
    }

    pub fn clear_address(&self, role: &str) -> Option<BleAddress> {
        self.entry(role).and_then(|e| e.address.clear())
    }

    /// Roles that still need an address.
    pub fn unresolved_roles(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.address.get().is_none())
            .map(|e| e.role())
            .collect()
    }
}
