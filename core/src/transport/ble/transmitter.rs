/// Owner side of key provisioning
///
/// Writes are fire-and-advance: all remaining chunks go out back to back,
/// then a single status read decides whether to finish, resume from the
/// accessory's confirmed offset, or give up.
use super::gatt::{encode_chunk, ProvisioningStatus, CHUNK_PAYLOAD_LEN};
use crate::crypto::{KeyMaterial, KEY_MATERIAL_LEN};
use crate::transport::abstraction::{GattLink, RadioError};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Resumed rounds allowed after the first full round
pub const MAX_RETRY_ROUNDS: u32 = 4;

/// Errors for owner-side provisioning
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisionError {
    #[error("Transport failure: {0}")]
    Transport(#[from] RadioError),
    #[error("Transfer exhausted after {rounds} rounds, {confirmed} of 64 bytes confirmed")]
    TransferExhausted { rounds: u32, confirmed: u8 },
    #[error("Invalid status from accessory: {0}")]
    InvalidStatus(String),
    #[error("No tag in config mode was seen")]
    NoCandidate,
    #[error("Provisioning cancelled")]
    Cancelled,
}

/// Summary of a successful transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransmitReport {
    /// Write rounds performed, including the first
    pub rounds: u32,
    /// Chunk writes issued across all rounds
    pub writes: usize,
}

/// Pushes one key over a provisioning link
#[derive(Debug, Clone)]
pub struct ChunkedKeyTransmitter {
    max_retry_rounds: u32,
}

impl Default for ChunkedKeyTransmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkedKeyTransmitter {
    pub fn new() -> Self {
        Self {
            max_retry_rounds: MAX_RETRY_ROUNDS,
        }
    }

    pub fn with_max_retry_rounds(mut self, rounds: u32) -> Self {
        self.max_retry_rounds = rounds;
        self
    }

    /// Drive the write/read loop until the accessory confirms all 64 bytes.
    ///
    /// Transport errors end the transfer immediately; only short status
    /// reads are retried.
    pub async fn transmit(
        &self,
        link: &mut dyn GattLink,
        key: &KeyMaterial,
    ) -> Result<TransmitReport, ProvisionError> {
        let bytes = key.as_bytes();
        let mut next_offset = 0usize;
        let mut retries = 0u32;
        let mut writes = 0usize;

        loop {
            while next_offset < KEY_MATERIAL_LEN {
                let mut data = [0u8; CHUNK_PAYLOAD_LEN];
                data.copy_from_slice(&bytes[next_offset..next_offset + CHUNK_PAYLOAD_LEN]);
                link.write(&encode_chunk(next_offset as u16, &data)).await?;
                debug!("Wrote chunk at offset {}", next_offset);
                writes += 1;
                next_offset += CHUNK_PAYLOAD_LEN;
            }

            let raw = link.read().await?;
            let status = ProvisioningStatus::from_bytes(&raw)
                .map_err(|e| ProvisionError::InvalidStatus(e.to_string()))?;
            let confirmed = status.total_confirmed as usize;
            info!("{} bytes transferred", confirmed);

            if confirmed == KEY_MATERIAL_LEN {
                return Ok(TransmitReport {
                    rounds: retries + 1,
                    writes,
                });
            }
            if confirmed > KEY_MATERIAL_LEN {
                return Err(ProvisionError::InvalidStatus(format!(
                    "{confirmed} bytes confirmed"
                )));
            }

            retries += 1;
            if retries > self.max_retry_rounds {
                warn!("Failed to write key after {} rounds", retries);
                return Err(ProvisionError::TransferExhausted {
                    rounds: retries,
                    confirmed: status.total_confirmed,
                });
            }
            next_offset = confirmed - confirmed % CHUNK_PAYLOAD_LEN;
            debug!("Round {} resumes at offset {}", retries + 1, next_offset);
        }
    }
}
