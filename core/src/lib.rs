// Keybeacon core: tag provisioning, fragment broadcast and report delivery
//
// Owner device -> chunked GATT writes -> accessory key store -> three
// advertised fragments -> any scanner reassembles -> encrypted report in the
// directory -> owner queries and decrypts.

pub mod accessory;
pub mod crypto;
pub mod directory;
pub mod identity;
pub mod node;
pub mod provision;
pub mod report;
pub mod shutdown;
pub mod store;
pub mod tracking;
pub mod transport;

pub use accessory::{AccessoryConfig, AccessoryError, AccessoryRuntime};
pub use crypto::{decode_public_key, decrypt, encode_public_key, encrypt, KeyError, KeyMaterial};
pub use directory::{
    DirectoryClient, DirectoryConfig, DirectoryError, HttpDirectory, MemoryDirectory,
    ReportRecord,
};
pub use identity::{load_public_key_material, IdentityError, OwnerKeys};
pub use node::{ConfigCandidate, NodeConfig, NodeStats, ScannerNode};
pub use provision::{run_provisioning_task, ProvisionConfig, ProvisionOutcome};
pub use report::{query_reports, DecryptedReport, LocationProvider, Reporter, StaticLocation};
pub use shutdown::{shutdown_channel, wait_for_shutdown, ShutdownSignal};
pub use store::{FileKeyStore, KeyStore, MemoryKeyStore, StoreError};
pub use tracking::{CollectEvent, CollectorConfig, FragmentCollector, TagRegistry, TrackedTag};
pub use transport::ble::{
    run_scan_task, ChunkedKeyReceiver, ChunkedKeyTransmitter, FragmentBroadcaster,
    ProvisionError, ScanStats, Sighting, SightingKind,
};
pub use transport::{
    GattLink, LoopbackRadio, PeripheralRadio, ProvisioningConnector, RadioError, RawAdvertisement,
};
