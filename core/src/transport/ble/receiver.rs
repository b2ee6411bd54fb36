/// Accessory side of key provisioning
///
/// [`ChunkedKeyReceiver`] is the pure session state machine. The
/// [`ProvisioningCharacteristic`] wraps it as a characteristic object,
/// persists the finished key and wakes whoever waits for provisioning.
use super::constants::CONFIG_CHARACTERISTIC_UUID;
use super::gatt::{Chunk, ChunkError, ProvisioningStatus, CHUNK_PAYLOAD_LEN};
use crate::crypto::{KeyMaterial, KEY_MATERIAL_LEN};
use crate::store::KeyStore;
use crate::transport::abstraction::{
    AttError, CharacteristicFlags, CharacteristicProperties, GattCharacteristicObject,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Result of feeding one write into the receiver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Chunk appended; `confirmed` bytes held so far
    Accepted { confirmed: u16 },
    /// Offset did not match; nothing changed
    Ignored { expected: u16, received: u16 },
    /// Final chunk appended and the key is whole
    Complete(KeyMaterial),
}

/// Receive-side transfer session
#[derive(Debug, Clone)]
pub struct ChunkedKeyReceiver {
    expected_offset: u16,
    total_confirmed: u16,
    buffer: [u8; KEY_MATERIAL_LEN],
}

impl Default for ChunkedKeyReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkedKeyReceiver {
    pub fn new() -> Self {
        Self {
            expected_offset: 0,
            total_confirmed: 0,
            buffer: [0u8; KEY_MATERIAL_LEN],
        }
    }

    /// Drop all progress; the next accepted chunk must be at offset 0
    pub fn reset(&mut self) {
        self.expected_offset = 0;
        self.total_confirmed = 0;
        self.buffer = [0u8; KEY_MATERIAL_LEN];
    }

    pub fn expected_offset(&self) -> u16 {
        self.expected_offset
    }

    pub fn status(&self) -> ProvisioningStatus {
        ProvisioningStatus {
            round_confirmed: self.expected_offset as u8,
            total_confirmed: self.total_confirmed as u8,
        }
    }

    /// Apply one characteristic write.
    ///
    /// Malformed writes are rejected before any state is touched. A write at
    /// offset 0 always restarts the session.
    pub fn write(&mut self, value: &[u8]) -> Result<WriteOutcome, ChunkError> {
        let chunk = Chunk::parse(value)?;
        let offset = chunk.header.offset;

        if offset == 0 && self.total_confirmed != 0 {
            debug!("Provisioning restarted at offset 0");
        }
        if offset == 0 {
            self.reset();
        }

        let start = offset as usize;
        if offset != self.expected_offset || start + CHUNK_PAYLOAD_LEN > KEY_MATERIAL_LEN {
            warn!(
                "Ignoring chunk at offset {} (expected {})",
                offset, self.expected_offset
            );
            return Ok(WriteOutcome::Ignored {
                expected: self.expected_offset,
                received: offset,
            });
        }

        self.buffer[start..start + CHUNK_PAYLOAD_LEN].copy_from_slice(chunk.payload);
        self.expected_offset += CHUNK_PAYLOAD_LEN as u16;
        self.total_confirmed += CHUNK_PAYLOAD_LEN as u16;
        debug!("Accepted chunk at offset {}, {} bytes confirmed", offset, self.total_confirmed);

        if self.total_confirmed as usize == KEY_MATERIAL_LEN {
            let key = KeyMaterial::from(self.buffer);
            // Counters stay at 64 so the sender's status read confirms completion
            self.buffer = [0u8; KEY_MATERIAL_LEN];
            return Ok(WriteOutcome::Complete(key));
        }

        Ok(WriteOutcome::Accepted {
            confirmed: self.total_confirmed,
        })
    }
}

/// Provisioning characteristic registered while the tag is in config mode
pub struct ProvisioningCharacteristic {
    receiver: Mutex<ChunkedKeyReceiver>,
    store: Arc<dyn KeyStore>,
    completed: Arc<Notify>,
}

impl ProvisioningCharacteristic {
    pub fn new(store: Arc<dyn KeyStore>) -> Self {
        Self {
            receiver: Mutex::new(ChunkedKeyReceiver::new()),
            store,
            completed: Arc::new(Notify::new()),
        }
    }

    /// Signalled once per key that has been persisted
    pub fn completion(&self) -> Arc<Notify> {
        self.completed.clone()
    }

    pub fn status(&self) -> ProvisioningStatus {
        self.receiver.lock().status()
    }
}

impl GattCharacteristicObject for ProvisioningCharacteristic {
    fn properties(&self) -> CharacteristicProperties {
        CharacteristicProperties {
            uuid: CONFIG_CHARACTERISTIC_UUID,
            flags: CharacteristicFlags {
                read: true,
                write: true,
            },
        }
    }

    fn read(&self) -> Result<Vec<u8>, AttError> {
        Ok(self.status().to_bytes())
    }

    fn write(&self, value: &[u8]) -> Result<(), AttError> {
        let outcome = self.receiver.lock().write(value).map_err(|e| {
            warn!("Rejected provisioning write: {}", e);
            AttError::InvalidValueLength
        })?;

        if let WriteOutcome::Complete(key) = outcome {
            if let Err(e) = self.store.store(&key) {
                // Status falls back to 0 so the sender never sees a false success
                self.receiver.lock().reset();
                return Err(AttError::Failed(e.to_string()));
            }
            info!("{} bytes received, key persisted", KEY_MATERIAL_LEN);
            self.completed.notify_one();
        }
        Ok(())
    }
}
