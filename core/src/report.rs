//! Encrypted location reports
//!
//! A scanner that reassembles a key encrypts its location to that key and
//! registers the ciphertext with the directory. The owner later queries by
//! the same key and decrypts what comes back, one record at a time.

use crate::crypto::{decrypt, encrypt, KeyError, KeyMaterial};
use crate::directory::{DirectoryClient, DirectoryError};
use crate::identity::{IdentityError, OwnerKeys};
use rsa::RsaPublicKey;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Placeholder location used until a real position source exists
pub const DEFAULT_LOCATION: &[u8] = b"Hello!";

#[derive(Error, Debug)]
pub enum ReportError {
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Identity(#[from] IdentityError),
}

/// Source of the opaque payload encrypted into each report
pub trait LocationProvider: Send + Sync {
    fn current_location(&self) -> Vec<u8>;
}

/// Fixed location payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticLocation(Vec<u8>);

impl StaticLocation {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self(payload.into())
    }
}

impl Default for StaticLocation {
    fn default() -> Self {
        Self(DEFAULT_LOCATION.to_vec())
    }
}

impl LocationProvider for StaticLocation {
    fn current_location(&self) -> Vec<u8> {
        self.0.clone()
    }
}

/// Builds and uploads reports for reassembled keys
#[derive(Clone)]
pub struct Reporter {
    directory: Arc<dyn DirectoryClient>,
    location: Arc<dyn LocationProvider>,
}

impl Reporter {
    pub fn new(directory: Arc<dyn DirectoryClient>, location: Arc<dyn LocationProvider>) -> Self {
        Self {
            directory,
            location,
        }
    }

    /// Encrypt the current location to `public_key` and register it under `key`
    pub async fn report(
        &self,
        key: &KeyMaterial,
        public_key: &RsaPublicKey,
    ) -> Result<(), ReportError> {
        let ciphertext = encrypt(public_key, &self.location.current_location())?;
        self.directory.register(key, &ciphertext).await?;
        info!("Report uploaded for key {}", &key.to_hex()[..16]);
        Ok(())
    }
}

/// One directory record after decryption
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedReport {
    pub timestamp: i64,
    pub content: Result<Vec<u8>, KeyError>,
}

/// Fetch every report for the owner's key and decrypt each independently
pub async fn query_reports(
    directory: &dyn DirectoryClient,
    owner: &OwnerKeys,
) -> Result<Vec<DecryptedReport>, ReportError> {
    let key = owner.key_material()?;
    let records = directory.query(&key).await?;
    debug!("Directory returned {} record(s)", records.len());

    Ok(records
        .into_iter()
        .map(|record| {
            let content = decrypt(owner.private_key(), &record.content);
            if let Err(e) = &content {
                warn!("Record at {} did not decrypt: {}", record.timestamp, e);
            }
            DecryptedReport {
                timestamp: record.timestamp,
                content,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::MAX_PLAINTEXT_LEN;
    use crate::directory::MemoryDirectory;

    #[tokio::test]
    async fn test_report_then_query_roundtrip() {
        let owner = OwnerKeys::generate().expect("Generate");
        let key = owner.key_material().expect("Key");
        let directory = MemoryDirectory::new();
        let reporter = Reporter::new(
            Arc::new(directory.clone()),
            Arc::new(StaticLocation::default()),
        );

        reporter.report(&key, owner.public_key()).await.expect("Report");

        let reports = query_reports(&directory, &owner).await.expect("Query");
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].content.as_deref(), Ok(DEFAULT_LOCATION));
    }

    #[tokio::test]
    async fn test_bad_record_does_not_abort_batch() {
        let owner = OwnerKeys::generate().expect("Generate");
        let key = owner.key_material().expect("Key");
        let directory = MemoryDirectory::new();

        directory.insert(key.as_bytes(), vec![0u8; 64], 1);
        let good = encrypt(owner.public_key(), b"here").expect("Encrypt");
        directory.insert(key.as_bytes(), good, 2);

        let reports = query_reports(&directory, &owner).await.expect("Query");
        assert_eq!(reports.len(), 2);
        assert!(reports[0].content.is_err());
        assert_eq!(reports[1].content.as_deref(), Ok(&b"here"[..]));
    }

    #[tokio::test]
    async fn test_oversized_location_fails_to_encrypt() {
        let owner = OwnerKeys::generate().expect("Generate");
        let key = owner.key_material().expect("Key");
        let directory = MemoryDirectory::new();
        let reporter = Reporter::new(
            Arc::new(directory.clone()),
            Arc::new(StaticLocation::new(vec![0u8; MAX_PLAINTEXT_LEN + 1])),
        );

        let result = reporter.report(&key, owner.public_key()).await;
        assert!(matches!(result, Err(ReportError::Key(_))));
        assert_eq!(directory.report_count(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_directory_surfaces_error() {
        let owner = OwnerKeys::generate().expect("Generate");
        let directory = MemoryDirectory::new();
        directory.set_available(false);
        assert!(matches!(
            query_reports(&directory, &owner).await,
            Err(ReportError::Directory(DirectoryError::Unavailable(_)))
        ));
    }
}
