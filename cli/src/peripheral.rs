// Peripheral-role radio over BlueZ
//
// Advertisements and GATT services from core are plain data; this adapter
// turns them into bluer objects and keeps the bluer handles inside the
// returned Registration so dropping it unregisters with BlueZ.

use async_trait::async_trait;
use bluer::adv::{Advertisement as BluerAdvertisement, Type as AdvertisementKind};
use bluer::gatt::local::{
    Application, Characteristic, CharacteristicRead, CharacteristicReadRequest,
    CharacteristicWrite, CharacteristicWriteMethod, CharacteristicWriteRequest, ReqError, Service,
};
use bluer::Adapter;
use keybeacon_core::transport::ble::{Advertisement, AdvertisementType};
use keybeacon_core::transport::{
    AttError, GattCharacteristicObject, GattService, PeripheralRadio, RadioError, Registration,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub struct BluezRadio {
    _session: bluer::Session,
    adapter: Adapter,
}

impl BluezRadio {
    pub async fn new() -> Result<Self, RadioError> {
        let session = bluer::Session::new()
            .await
            .map_err(|e| RadioError::Failed(e.to_string()))?;
        let adapter = session
            .default_adapter()
            .await
            .map_err(|_| RadioError::AdapterNotFound)?;
        info!("Using Bluetooth adapter: {}", adapter.name());

        let powered = adapter
            .is_powered()
            .await
            .map_err(|e| RadioError::Failed(e.to_string()))?;
        if !powered {
            info!("Powering on Bluetooth adapter...");
            adapter
                .set_powered(true)
                .await
                .map_err(|e| RadioError::Failed(e.to_string()))?;
        }

        Ok(Self {
            _session: session,
            adapter,
        })
    }
}

fn to_bluer_advertisement(advertisement: &Advertisement) -> BluerAdvertisement {
    BluerAdvertisement {
        advertisement_type: match advertisement.advertisement_type {
            AdvertisementType::Peripheral => AdvertisementKind::Peripheral,
            AdvertisementType::Broadcast => AdvertisementKind::Broadcast,
        },
        service_uuids: advertisement.service_uuids.iter().copied().collect(),
        manufacturer_data: advertisement.manufacturer_data.clone(),
        duration: advertisement
            .duration_secs
            .map(|secs| Duration::from_secs(u64::from(secs))),
        timeout: advertisement
            .timeout_secs
            .map(|secs| Duration::from_secs(u64::from(secs))),
        ..Default::default()
    }
}

fn to_req_error(error: AttError) -> ReqError {
    match error {
        AttError::NotSupported => ReqError::NotSupported,
        AttError::InvalidValueLength => ReqError::InvalidValueLength,
        AttError::Failed(reason) => {
            debug!("Characteristic operation failed: {}", reason);
            ReqError::Failed
        }
    }
}

fn to_bluer_characteristic(object: Arc<dyn GattCharacteristicObject>) -> Characteristic {
    let properties = object.properties();

    let read = properties.flags.read.then(|| {
        let object = object.clone();
        CharacteristicRead {
            read: true,
            fun: Box::new(move |_req: CharacteristicReadRequest| {
                let object = object.clone();
                Box::pin(async move { object.read().map_err(to_req_error) })
            }),
            ..Default::default()
        }
    });

    let write = properties.flags.write.then(|| {
        let object = object.clone();
        CharacteristicWrite {
            write: true,
            method: CharacteristicWriteMethod::Fun(Box::new(
                move |value: Vec<u8>, _req: CharacteristicWriteRequest| {
                    let object = object.clone();
                    Box::pin(async move { object.write(&value).map_err(to_req_error) })
                },
            )),
            ..Default::default()
        }
    });

    Characteristic {
        uuid: properties.uuid,
        read,
        write,
        ..Default::default()
    }
}

#[async_trait]
impl PeripheralRadio for BluezRadio {
    async fn register_advertisement(
        &self,
        advertisement: Advertisement,
    ) -> Result<Registration, RadioError> {
        let handle = self
            .adapter
            .advertise(to_bluer_advertisement(&advertisement))
            .await
            .map_err(|e| RadioError::RegistrationFailed(e.to_string()))?;
        debug!(
            "Advertising {} with {:?}",
            advertisement.advertisement_type.as_str(),
            advertisement.service_uuids
        );
        Ok(Registration::new("advertisement", handle))
    }

    async fn register_service(&self, service: GattService) -> Result<Registration, RadioError> {
        let app = Application {
            services: vec![Service {
                uuid: service.uuid,
                primary: service.primary,
                characteristics: service
                    .characteristics
                    .iter()
                    .cloned()
                    .map(to_bluer_characteristic)
                    .collect(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let handle = self
            .adapter
            .serve_gatt_application(app)
            .await
            .map_err(|e| RadioError::RegistrationFailed(e.to_string()))?;
        info!("GATT service {} registered", service.uuid);
        Ok(Registration::new("gatt service", handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keybeacon_core::transport::ble::{Fragment, VENDOR_ID};

    #[test]
    fn test_beacon_advertisement_conversion() {
        let fragment = Fragment::new(3, vec![0xAB; 20]).unwrap();
        let adv = to_bluer_advertisement(&fragment.advertisement());

        assert!(matches!(adv.advertisement_type, AdvertisementKind::Peripheral));
        assert_eq!(adv.duration, Some(Duration::from_secs(3)));
        let content = adv.manufacturer_data.get(&VENDOR_ID).unwrap();
        assert_eq!(content[0], 3);
        assert_eq!(content.len(), 23);
    }

    #[test]
    fn test_att_errors_map_to_bluez_codes() {
        assert!(matches!(to_req_error(AttError::InvalidValueLength), ReqError::InvalidValueLength));
        assert!(matches!(to_req_error(AttError::NotSupported), ReqError::NotSupported));
        assert!(matches!(to_req_error(AttError::Failed("disk".into())), ReqError::Failed));
    }
}
