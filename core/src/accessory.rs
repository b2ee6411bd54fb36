//! Accessory runtime
//!
//! Two mutually exclusive phases, chosen from the key store:
//!
//! - **Provisioning**: no key yet. The provisioning service and the config
//!   advertisement are registered. Once a key is persisted the advertisement
//!   goes away, the service stays up for a grace period so the owner can read
//!   the final status, and then the runtime re-checks the store.
//! - **Beacon**: key present. The three fragments advertise until shutdown.
//!
//! Every registration is scoped to its phase and released on all exits.

use crate::crypto::KeyMaterial;
use crate::shutdown::{is_shutdown, wait_for_shutdown, ShutdownSignal};
use crate::store::{KeyStore, StoreError};
use crate::transport::abstraction::{
    GattCharacteristicObject, GattService, PeripheralRadio, RadioError,
};
use crate::transport::ble::beacon::FragmentBroadcaster;
use crate::transport::ble::constants::CONFIG_SERVICE_UUID;
use crate::transport::ble::receiver::ProvisioningCharacteristic;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Default time the provisioning service outlives a successful write
pub const DEFAULT_PROVISIONING_GRACE: Duration = Duration::from_secs(300);

#[derive(Error, Debug)]
pub enum AccessoryError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Radio(#[from] RadioError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessoryConfig {
    pub provisioning_grace: Duration,
}

impl Default for AccessoryConfig {
    fn default() -> Self {
        Self {
            provisioning_grace: DEFAULT_PROVISIONING_GRACE,
        }
    }
}

impl AccessoryConfig {
    pub fn with_provisioning_grace(mut self, grace: Duration) -> Self {
        self.provisioning_grace = grace;
        self
    }
}

pub struct AccessoryRuntime {
    radio: Arc<dyn PeripheralRadio>,
    store: Arc<dyn KeyStore>,
    config: AccessoryConfig,
}

impl AccessoryRuntime {
    pub fn new(
        radio: Arc<dyn PeripheralRadio>,
        store: Arc<dyn KeyStore>,
        config: AccessoryConfig,
    ) -> Self {
        Self {
            radio,
            store,
            config,
        }
    }

    /// Run until shutdown
    pub async fn run(&self, mut shutdown: ShutdownSignal) -> Result<(), AccessoryError> {
        loop {
            if is_shutdown(&shutdown) {
                return Ok(());
            }
            match self.store.load()? {
                Some(key) => return self.beacon_phase(&key, &mut shutdown).await,
                None => {
                    if !self.provisioning_phase(&mut shutdown).await? {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Returns false when cancelled before the phase finished
    async fn provisioning_phase(
        &self,
        shutdown: &mut ShutdownSignal,
    ) -> Result<bool, AccessoryError> {
        let characteristic = ProvisioningCharacteristic::new(self.store.clone());
        let completed = characteristic.completion();
        let characteristic: Arc<dyn GattCharacteristicObject> = Arc::new(characteristic);

        let service = self
            .radio
            .register_service(GattService {
                uuid: CONFIG_SERVICE_UUID,
                primary: true,
                characteristics: vec![characteristic],
            })
            .await?;
        let mut advertiser = FragmentBroadcaster::config_mode();
        advertiser.start(self.radio.as_ref()).await?;
        info!("Waiting for provisioning");

        let cancelled = tokio::select! {
            _ = completed.notified() => false,
            _ = wait_for_shutdown(shutdown) => true,
        };
        advertiser.stop();
        if cancelled {
            service.release();
            return Ok(false);
        }

        info!(
            "Key provisioned, provisioning service stays up for {:?}",
            self.config.provisioning_grace
        );
        let cancelled = tokio::select! {
            _ = tokio::time::sleep(self.config.provisioning_grace) => false,
            _ = wait_for_shutdown(shutdown) => true,
        };
        service.release();
        Ok(!cancelled)
    }

    async fn beacon_phase(
        &self,
        key: &KeyMaterial,
        shutdown: &mut ShutdownSignal,
    ) -> Result<(), AccessoryError> {
        let mut broadcaster = FragmentBroadcaster::for_key(key);
        broadcaster.start(self.radio.as_ref()).await?;
        wait_for_shutdown(shutdown).await;
        broadcaster.stop();
        Ok(())
    }
}
