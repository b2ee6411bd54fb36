/// BLE protocol layer for keybeacon tags
///
/// - **constants**: vendor id, service and characteristic UUIDs
/// - **advertisement**: advertisement data objects handed to the radio
/// - **gatt**: provisioning chunk and status wire format
/// - **receiver**: accessory-side chunk reassembly and the provisioning characteristic
/// - **transmitter**: owner-side chunked key transfer with resumable rounds
/// - **beacon**: key fragments and the advertising lifecycle
/// - **scanner**: advertisement parsing and the scan task
///
/// Nothing here touches a Bluetooth stack; adapters live behind the traits in
/// [`crate::transport::abstraction`].

pub mod advertisement;
pub mod beacon;
pub mod constants;
pub mod gatt;
pub mod receiver;
pub mod scanner;
pub mod transmitter;

pub use advertisement::{Advertisement, AdvertisementType};
pub use beacon::{
    decode_fragments, split_key, BroadcastState, Fragment, FragmentBroadcaster, FragmentError,
    FRAGMENT_SENTINEL, FRAGMENT_WIRE_LEN, LAST_FRAGMENT_LEN,
};
pub use constants::{
    BEACON_SERVICE_UUID, CONFIG_CHARACTERISTIC_UUID, CONFIG_INDEX, CONFIG_SERVICE_UUID, VENDOR_ID,
};
pub use gatt::{encode_chunk, Chunk, ChunkError, ChunkHeader, ProvisioningStatus, CHUNK_PAYLOAD_LEN};
pub use receiver::{ChunkedKeyReceiver, ProvisioningCharacteristic, WriteOutcome};
pub use scanner::{parse_advertisement, run_scan_task, ScanStats, Sighting, SightingKind};
pub use transmitter::{ChunkedKeyTransmitter, ProvisionError, TransmitReport, MAX_RETRY_ROUNDS};
