//! In-process radio for tests and simulated runs
//!
//! Registrations land in shared maps and vanish when their [`Registration`]
//! drops. Owner-side links connect straight to the registered provisioning
//! characteristic, optionally through a write filter that drops chunks.

use crate::transport::abstraction::{
    GattCharacteristicObject, GattLink, GattService, PeripheralRadio, ProvisioningConnector,
    RadioError, Registration,
};
use crate::transport::ble::advertisement::Advertisement;
use crate::transport::ble::constants::CONFIG_CHARACTERISTIC_UUID;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

type WriteFilter = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;

#[derive(Default)]
struct LoopbackState {
    advertisements: BTreeMap<u64, Advertisement>,
    services: BTreeMap<u64, GattService>,
    advertisement_budget: Option<usize>,
    service_failure: Option<RadioError>,
}

/// Shared in-memory radio; clones see the same registrations
#[derive(Clone, Default)]
pub struct LoopbackRadio {
    state: Arc<Mutex<LoopbackState>>,
    next_id: Arc<AtomicU64>,
    write_filter: Arc<Mutex<Option<WriteFilter>>>,
}

struct LoopbackGuard {
    id: u64,
    service: bool,
    state: Arc<Mutex<LoopbackState>>,
}

impl Drop for LoopbackGuard {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if self.service {
            state.services.remove(&self.id);
        } else {
            state.advertisements.remove(&self.id);
        }
    }
}

impl LoopbackRadio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let `count` more advertisement registrations succeed, then fail
    pub fn fail_advertisements_after(&self, count: usize) {
        self.state.lock().advertisement_budget = Some(count);
    }

    /// Make every service registration fail with `error`
    pub fn fail_services_with(&self, error: RadioError) {
        self.state.lock().service_failure = Some(error);
    }

    /// Writes for which `filter` returns false never reach the characteristic
    pub fn set_write_filter<F>(&self, filter: F)
    where
        F: Fn(&[u8]) -> bool + Send + Sync + 'static,
    {
        *self.write_filter.lock() = Some(Arc::new(filter));
    }

    pub fn active_advertisements(&self) -> Vec<Advertisement> {
        self.state.lock().advertisements.values().cloned().collect()
    }

    pub fn active_services(&self) -> usize {
        self.state.lock().services.len()
    }

    /// Find a registered characteristic by UUID
    pub fn characteristic(&self, uuid: Uuid) -> Option<Arc<dyn GattCharacteristicObject>> {
        self.state
            .lock()
            .services
            .values()
            .flat_map(|s| s.characteristics.iter())
            .find(|c| c.properties().uuid == uuid)
            .cloned()
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn guard(&self, id: u64, service: bool) -> LoopbackGuard {
        LoopbackGuard {
            id,
            service,
            state: self.state.clone(),
        }
    }
}

#[async_trait]
impl PeripheralRadio for LoopbackRadio {
    async fn register_advertisement(
        &self,
        advertisement: Advertisement,
    ) -> Result<Registration, RadioError> {
        let id = self.next_id();
        {
            let mut state = self.state.lock();
            if let Some(budget) = state.advertisement_budget.as_mut() {
                if *budget == 0 {
                    return Err(RadioError::RegistrationFailed(
                        "advertisement slots exhausted".to_string(),
                    ));
                }
                *budget -= 1;
            }
            state.advertisements.insert(id, advertisement);
        }
        Ok(Registration::new(
            format!("advertisement {id}"),
            self.guard(id, false),
        ))
    }

    async fn register_service(&self, service: GattService) -> Result<Registration, RadioError> {
        let id = self.next_id();
        {
            let mut state = self.state.lock();
            if let Some(err) = state.service_failure.clone() {
                return Err(err);
            }
            state.services.insert(id, service);
        }
        Ok(Registration::new(format!("service {id}"), self.guard(id, true)))
    }
}

/// Owner-side link into a loopback characteristic
pub struct LoopbackLink {
    address: String,
    radio: LoopbackRadio,
    connected: bool,
}

impl LoopbackLink {
    fn characteristic(&self) -> Result<Arc<dyn GattCharacteristicObject>, RadioError> {
        if !self.connected {
            return Err(RadioError::NotConnected(self.address.clone()));
        }
        self.radio
            .characteristic(CONFIG_CHARACTERISTIC_UUID)
            .ok_or(RadioError::CharacteristicNotFound(CONFIG_CHARACTERISTIC_UUID))
    }
}

#[async_trait]
impl GattLink for LoopbackLink {
    async fn write(&mut self, value: &[u8]) -> Result<(), RadioError> {
        let chr = self.characteristic()?;
        let filter = self.radio.write_filter.lock().clone();
        if let Some(filter) = filter {
            if !filter(value) {
                return Ok(());
            }
        }
        chr.write(value)
            .map_err(|e| RadioError::WriteFailed(e.to_string()))
    }

    async fn read(&mut self) -> Result<Vec<u8>, RadioError> {
        self.characteristic()?
            .read()
            .map_err(|e| RadioError::ReadFailed(e.to_string()))
    }

    async fn disconnect(&mut self) -> Result<(), RadioError> {
        self.connected = false;
        Ok(())
    }
}

#[async_trait]
impl ProvisioningConnector for LoopbackRadio {
    async fn connect(&self, address: &str) -> Result<Box<dyn GattLink>, RadioError> {
        if self.characteristic(CONFIG_CHARACTERISTIC_UUID).is_none() {
            return Err(RadioError::NotConnected(address.to_string()));
        }
        Ok(Box::new(LoopbackLink {
            address: address.to_string(),
            radio: self.clone(),
            connected: true,
        }))
    }
}
