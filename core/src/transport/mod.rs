// Transport module: radio abstraction and the BLE tag protocol

pub mod abstraction;
pub mod ble;
pub mod loopback;

pub use abstraction::{
    AttError, CharacteristicFlags, CharacteristicProperties, GattCharacteristicObject, GattLink,
    GattService, PeripheralRadio, ProvisioningConnector, RadioError, RawAdvertisement,
    Registration,
};
pub use loopback::{LoopbackLink, LoopbackRadio};
