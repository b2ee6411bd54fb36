// Central-role radio over btleplug
//
// Scanning is filtered to the beacon and config services and yields each
// manufacturer-data report as a RawAdvertisement.
// Provisioning links write with response so each chunk is acknowledged by
// the tag's stack before the next one goes out.

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::{Stream, StreamExt};
use keybeacon_core::transport::ble::{
    BEACON_SERVICE_UUID, CONFIG_CHARACTERISTIC_UUID, CONFIG_SERVICE_UUID,
};
use keybeacon_core::{GattLink, ProvisioningConnector, RadioError, RawAdvertisement};
use std::collections::HashMap;
use std::pin::Pin;
use tracing::{debug, info, warn};

pub type AdvertisementStream = Pin<Box<dyn Stream<Item = RawAdvertisement> + Send>>;

/// First adapter the platform reports
pub async fn default_adapter() -> Result<Adapter, RadioError> {
    let manager = Manager::new()
        .await
        .map_err(|e| RadioError::Failed(e.to_string()))?;
    let adapters = manager
        .adapters()
        .await
        .map_err(|e| RadioError::Failed(e.to_string()))?;
    let adapter = adapters
        .into_iter()
        .next()
        .ok_or(RadioError::AdapterNotFound)?;
    if let Ok(info) = adapter.adapter_info().await {
        info!("Using Bluetooth adapter: {}", info);
    }
    Ok(adapter)
}

/// Tags advertise one of these two services depending on their mode
fn scan_filter() -> ScanFilter {
    ScanFilter {
        services: vec![BEACON_SERVICE_UUID, CONFIG_SERVICE_UUID],
    }
}

/// Start a filtered scan and turn central events into advertisement reports
pub async fn scan(adapter: &Adapter) -> Result<AdvertisementStream, RadioError> {
    let events = adapter
        .events()
        .await
        .map_err(|e| RadioError::Failed(e.to_string()))?;
    adapter
        .start_scan(scan_filter())
        .await
        .map_err(|e| RadioError::Failed(e.to_string()))?;
    info!("Scanning for tag advertisements");

    let adapter = adapter.clone();
    let stream = events.filter_map(move |event| {
        let adapter = adapter.clone();
        async move {
            match event {
                CentralEvent::ManufacturerDataAdvertisement {
                    id,
                    manufacturer_data,
                } => {
                    let peripheral = match adapter.peripheral(&id).await {
                        Ok(p) => p,
                        Err(e) => {
                            debug!("Advertisement from vanished peripheral: {}", e);
                            return None;
                        }
                    };
                    Some(to_raw_advertisement(
                        peripheral.address().to_string(),
                        manufacturer_data,
                    ))
                }
                _ => None,
            }
        }
    });
    Ok(Box::pin(stream))
}

fn to_raw_advertisement(address: String, manufacturer_data: HashMap<u16, Vec<u8>>) -> RawAdvertisement {
    manufacturer_data
        .into_iter()
        .fold(RawAdvertisement::new(address), |raw, (vendor, data)| {
            raw.with_manufacturer_data(vendor, data)
        })
}

/// Opens provisioning links to tags the adapter has already seen
pub struct BtleplugConnector {
    adapter: Adapter,
}

impl BtleplugConnector {
    pub fn new(adapter: Adapter) -> Self {
        Self { adapter }
    }

    async fn find(&self, address: &str) -> Result<Peripheral, RadioError> {
        let peripherals = self
            .adapter
            .peripherals()
            .await
            .map_err(|e| RadioError::Failed(e.to_string()))?;
        peripherals
            .into_iter()
            .find(|p| p.address().to_string().eq_ignore_ascii_case(address))
            .ok_or_else(|| RadioError::NotConnected(address.to_string()))
    }
}

#[async_trait]
impl ProvisioningConnector for BtleplugConnector {
    async fn connect(&self, address: &str) -> Result<Box<dyn GattLink>, RadioError> {
        let peripheral = self.find(address).await?;
        peripheral
            .connect()
            .await
            .map_err(|e| RadioError::NotConnected(format!("{}: {}", address, e)))?;
        peripheral
            .discover_services()
            .await
            .map_err(|e| RadioError::Failed(e.to_string()))?;

        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == CONFIG_CHARACTERISTIC_UUID);
        let Some(characteristic) = characteristic else {
            let _ = peripheral.disconnect().await;
            return Err(RadioError::CharacteristicNotFound(CONFIG_CHARACTERISTIC_UUID));
        };

        debug!("Connected to {}", address);
        Ok(Box::new(BtleplugLink {
            peripheral,
            characteristic,
        }))
    }
}

struct BtleplugLink {
    peripheral: Peripheral,
    characteristic: Characteristic,
}

#[async_trait]
impl GattLink for BtleplugLink {
    async fn write(&mut self, value: &[u8]) -> Result<(), RadioError> {
        self.peripheral
            .write(&self.characteristic, value, WriteType::WithResponse)
            .await
            .map_err(|e| RadioError::WriteFailed(e.to_string()))
    }

    async fn read(&mut self) -> Result<Vec<u8>, RadioError> {
        self.peripheral
            .read(&self.characteristic)
            .await
            .map_err(|e| RadioError::ReadFailed(e.to_string()))
    }

    async fn disconnect(&mut self) -> Result<(), RadioError> {
        if let Err(e) = self.peripheral.disconnect().await {
            warn!("Disconnect failed: {}", e);
            return Err(RadioError::Failed(e.to_string()));
        }
        Ok(())
    }
}
