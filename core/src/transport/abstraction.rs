//! Radio abstraction layer for keybeacon
//!
//! The core never talks to a Bluetooth stack directly. The accessory side
//! registers plain data objects (advertisements and GATT services) with a
//! [`PeripheralRadio`]; the owner side reaches a tag's provisioning
//! characteristic through a [`ProvisioningConnector`]. Registration
//! lifetime belongs to the adapter and is scoped by [`Registration`].

use crate::transport::ble::advertisement::Advertisement;
use async_trait::async_trait;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by radio adapters
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RadioError {
    #[error("No Bluetooth adapter found")]
    AdapterNotFound,
    #[error("Registration failed: {0}")]
    RegistrationFailed(String),
    #[error("Not connected to {0}")]
    NotConnected(String),
    #[error("Characteristic {0} not found")]
    CharacteristicNotFound(Uuid),
    #[error("Write failed: {0}")]
    WriteFailed(String),
    #[error("Read failed: {0}")]
    ReadFailed(String),
    #[error("Radio operation failed: {0}")]
    Failed(String),
}

/// Errors a characteristic object reports back to the remote peer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttError {
    #[error("Operation not supported")]
    NotSupported,
    #[error("Invalid value length")]
    InvalidValueLength,
    #[error("Operation failed: {0}")]
    Failed(String),
}

/// Characteristic flags as exposed to the radio stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CharacteristicFlags {
    pub read: bool,
    pub write: bool,
}

/// Property view of a characteristic object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicProperties {
    pub uuid: Uuid,
    pub flags: CharacteristicFlags,
}

/// Capability interface for a characteristic registered with a radio adapter
pub trait GattCharacteristicObject: Send + Sync {
    fn properties(&self) -> CharacteristicProperties;
    fn read(&self) -> Result<Vec<u8>, AttError>;
    fn write(&self, value: &[u8]) -> Result<(), AttError>;
}

/// A GATT service made of characteristic objects
#[derive(Clone)]
pub struct GattService {
    pub uuid: Uuid,
    pub primary: bool,
    pub characteristics: Vec<Arc<dyn GattCharacteristicObject>>,
}

impl fmt::Debug for GattService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let uuids: Vec<Uuid> = self
            .characteristics
            .iter()
            .map(|c| c.properties().uuid)
            .collect();
        f.debug_struct("GattService")
            .field("uuid", &self.uuid)
            .field("primary", &self.primary)
            .field("characteristics", &uuids)
            .finish()
    }
}

/// Scoped hold on an object registered with the radio stack.
///
/// Dropping the registration unregisters the object, so release happens on
/// every exit path including errors and task cancellation.
pub struct Registration {
    label: String,
    guard: Option<Box<dyn Any + Send>>,
}

impl Registration {
    /// Wrap an adapter-specific handle whose drop unregisters the object
    pub fn new(label: impl Into<String>, guard: impl Any + Send) -> Self {
        Self {
            label: label.into(),
            guard: Some(Box::new(guard)),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Unregister now rather than at end of scope
    pub fn release(mut self) {
        self.guard.take();
        tracing::debug!("Released {}", self.label);
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if self.guard.take().is_some() {
            tracing::debug!("Released {} on drop", self.label);
        }
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("label", &self.label)
            .finish()
    }
}

/// Peripheral role: what the accessory needs from its radio
#[async_trait]
pub trait PeripheralRadio: Send + Sync {
    async fn register_advertisement(
        &self,
        advertisement: Advertisement,
    ) -> Result<Registration, RadioError>;

    async fn register_service(&self, service: GattService) -> Result<Registration, RadioError>;
}

/// Connected link to a tag's provisioning characteristic
#[async_trait]
pub trait GattLink: Send {
    async fn write(&mut self, value: &[u8]) -> Result<(), RadioError>;

    async fn read(&mut self) -> Result<Vec<u8>, RadioError>;

    async fn disconnect(&mut self) -> Result<(), RadioError> {
        Ok(())
    }
}

/// Central role used by the owner device to open provisioning links
#[async_trait]
pub trait ProvisioningConnector: Send + Sync {
    async fn connect(&self, address: &str) -> Result<Box<dyn GattLink>, RadioError>;
}

/// One advertisement report as delivered by a scanning radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAdvertisement {
    pub address: String,
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
}

impl RawAdvertisement {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            manufacturer_data: HashMap::new(),
        }
    }

    pub fn with_manufacturer_data(mut self, vendor_id: u16, data: Vec<u8>) -> Self {
        self.manufacturer_data.insert(vendor_id, data);
        self
    }
}
