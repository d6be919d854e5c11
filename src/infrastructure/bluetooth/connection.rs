//! BLE Connection Module
//!
//! Opens a device by address, indexes its GATT characteristics and serves
//! attribute reads and writes for one session.

use crate::domain::models::BleAddress;
use crate::infrastructure::bluetooth::{BleError, GattLink};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;
use windows::core::GUID;
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic, GattCommunicationStatus, GattDeviceService, GattWriteOption,
};
use windows::Devices::Bluetooth::{BluetoothCacheMode, BluetoothLEDevice};
use windows::Storage::Streams::{DataReader, DataWriter};

// E_FAIL
const GATT_UNAVAILABLE: windows::core::HRESULT = windows::core::HRESULT(0x8000_4005_u32 as i32);

fn to_uuid(guid: GUID) -> Uuid {
    Uuid::from_fields(guid.data1, guid.data2, guid.data3, &guid.data4)
}

/// Live WinRT connection
pub struct BleConnection {
    address: BleAddress,
    device: Mutex<Option<BluetoothLEDevice>>,
    services: Mutex<Vec<GattDeviceService>>,
    characteristics: HashMap<Uuid, GattCharacteristic>,
    closed: AtomicBool,
}

impl BleConnection {
    /// Connect to a device by Bluetooth address
    pub async fn connect(address: BleAddress) -> Result<Self, BleError> {
        info!(%address, "Connecting to Bluetooth device");

        let connect_err = |e: windows::core::Error| BleError::Connect {
            address,
            reason: e.message(),
        };

        let device = BluetoothLEDevice::FromBluetoothAddressAsync(address.as_u64())
            .map_err(connect_err)?
            .await
            .map_err(connect_err)?;

        let (services, characteristics) = match Self::index_characteristics(&device).await {
            Ok(found) => found,
            Err(e) => {
                let _ = device.Close();
                return Err(connect_err(e));
            }
        };
        info!(%address, "Found {} characteristics", characteristics.len());

        Ok(Self {
            address,
            device: Mutex::new(Some(device)),
            services: Mutex::new(services),
            characteristics,
            closed: AtomicBool::new(false),
        })
    }

    /// Walk every GATT service and map characteristic UUIDs to handles
    async fn index_characteristics(
        device: &BluetoothLEDevice,
    ) -> windows::core::Result<(Vec<GattDeviceService>, HashMap<Uuid, GattCharacteristic>)> {
        let services_result = device
            .GetGattServicesWithCacheModeAsync(BluetoothCacheMode::Uncached)?
            .await?;

        if services_result.Status()? != GattCommunicationStatus::Success {
            return Err(windows::core::Error::new(
                GATT_UNAVAILABLE,
                format!("GATT services unavailable: {:?}", services_result.Status()?),
            ));
        }

        let services = services_result.Services()?;
        let mut kept = Vec::new();
        let mut characteristics = HashMap::new();

        for i in 0..services.Size()? {
            let service = services.GetAt(i)?;
            let chars_result = service
                .GetCharacteristicsWithCacheModeAsync(BluetoothCacheMode::Uncached)?
                .await?;
            if chars_result.Status()? != GattCommunicationStatus::Success {
                debug!("Skipping service {:?}", service.Uuid()?);
                continue;
            }

            let list = chars_result.Characteristics()?;
            for j in 0..list.Size()? {
                let c = list.GetAt(j)?;
                characteristics.insert(to_uuid(c.Uuid()?), c);
            }
            kept.push(service);
        }

        Ok((kept, characteristics))
    }

    fn characteristic(&self, uuid: Uuid) -> Result<&GattCharacteristic, BleError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BleError::Disconnected);
        }
        self.characteristics
            .get(&uuid)
            .ok_or(BleError::CharacteristicNotFound(uuid))
    }
}

fn status_error(status: GattCommunicationStatus) -> BleError {
    if status == GattCommunicationStatus::Unreachable {
        BleError::Disconnected
    } else {
        BleError::Io(format!("GATT status {:?}", status))
    }
}

#[async_trait]
impl GattLink for BleConnection {
    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>, BleError> {
        let c = self.characteristic(characteristic)?;
        let result = c
            .ReadValueWithCacheModeAsync(BluetoothCacheMode::Uncached)?
            .await?;

        let status = result.Status()?;
        if status != GattCommunicationStatus::Success {
            return Err(status_error(status));
        }

        let reader = DataReader::FromBuffer(&result.Value()?)?;
        let length = reader.UnconsumedBufferLength()? as usize;
        let mut bytes = vec![0u8; length];
        reader.ReadBytes(&mut bytes)?;
        Ok(bytes)
    }

    async fn write(
        &self,
        characteristic: Uuid,
        data: &[u8],
        with_response: bool,
    ) -> Result<(), BleError> {
        let c = self.characteristic(characteristic)?;

        let writer = DataWriter::new()?;
        writer.WriteBytes(data)?;
        let buffer = writer.DetachBuffer()?;

        let option = if with_response {
            GattWriteOption::WriteWithResponse
        } else {
            GattWriteOption::WriteWithoutResponse
        };
        let status = c.WriteValueWithOptionAsync(&buffer, option)?.await?;
        if status != GattCommunicationStatus::Success {
            return Err(status_error(status));
        }
        Ok(())
    }

    async fn disconnect(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Ok(mut services) = self.services.lock() {
            for service in services.drain(..) {
                let _ = service.Close();
            }
        }
        match self.device.lock() {
            Ok(mut device) => {
                if let Some(device) = device.take() {
                    let _ = device.Close();
                }
            }
            Err(_) => warn!(address = %self.address, "Device handle lock poisoned"),
        }
        info!(address = %self.address, "Disconnected from device");
    }
}
