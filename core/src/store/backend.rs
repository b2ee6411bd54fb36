// Key storage abstraction for the accessory's provisioned key
//
// The persisted form is the raw 64-byte key material, nothing else.

use crate::crypto::{KeyMaterial, KEY_MATERIAL_LEN};
use parking_lot::RwLock;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors for key persistence
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Key store I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("Stored key is {0} bytes, expected 64")]
    Corrupt(usize),
}

/// Durable home for the provisioned key
pub trait KeyStore: Send + Sync {
    fn load(&self) -> Result<Option<KeyMaterial>, StoreError>;
    fn store(&self, key: &KeyMaterial) -> Result<(), StoreError>;
}

/// Raw 64-byte key file on disk
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    path: PathBuf,
}

impl FileKeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyStore for FileKeyStore {
    fn load(&self) -> Result<Option<KeyMaterial>, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if bytes.len() != KEY_MATERIAL_LEN {
            return Err(StoreError::Corrupt(bytes.len()));
        }
        KeyMaterial::from_bytes(&bytes)
            .map(Some)
            .map_err(|_| StoreError::Corrupt(bytes.len()))
    }

    fn store(&self, key: &KeyMaterial) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        // Readers see either the old key or the new one, never a partial write
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, key.as_bytes())?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// In-memory key store for tests and simulated accessories
#[derive(Clone, Default)]
pub struct MemoryKeyStore {
    key: Arc<RwLock<Option<KeyMaterial>>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(key: KeyMaterial) -> Self {
        Self {
            key: Arc::new(RwLock::new(Some(key))),
        }
    }
}

impl KeyStore for MemoryKeyStore {
    fn load(&self) -> Result<Option<KeyMaterial>, StoreError> {
        Ok(self.key.read().clone())
    }

    fn store(&self, key: &KeyMaterial) -> Result<(), StoreError> {
        *self.key.write() = Some(key.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_key() -> KeyMaterial {
        let mut raw = [0u8; KEY_MATERIAL_LEN];
        for (i, b) in raw.iter_mut().enumerate() {
            *b = i as u8;
        }
        KeyMaterial::from(raw)
    }

    #[test]
    fn test_file_store_missing_is_none() {
        let dir = tempfile::tempdir().expect("Temp dir");
        let store = FileKeyStore::new(dir.path().join("AccessoryKey"));
        assert!(store.load().expect("Load").is_none());
    }

    #[test]
    fn test_file_store_roundtrip_is_raw_bytes() {
        let dir = tempfile::tempdir().expect("Temp dir");
        let path = dir.path().join("AccessoryKey");
        let store = FileKeyStore::new(&path);

        store.store(&sample_key()).expect("Store");

        let on_disk = std::fs::read(&path).expect("Read");
        assert_eq!(on_disk.as_slice(), sample_key().as_bytes());
        assert_eq!(store.load().expect("Load"), Some(sample_key()));
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_file_store_rejects_truncated_file() {
        let dir = tempfile::tempdir().expect("Temp dir");
        let path = dir.path().join("AccessoryKey");
        std::fs::write(&path, [0u8; 48]).expect("Write");

        let store = FileKeyStore::new(&path);
        assert!(matches!(store.load(), Err(StoreError::Corrupt(48))));
    }

    #[test]
    fn test_file_store_creates_parent_dirs() {
        let dir = tempfile::tempdir().expect("Temp dir");
        let store = FileKeyStore::new(dir.path().join("nested/dir/AccessoryKey"));
        store.store(&sample_key()).expect("Store");
        assert!(store.load().expect("Load").is_some());
    }

    #[test]
    fn test_memory_store_shares_state_between_clones() {
        let store = MemoryKeyStore::new();
        let clone = store.clone();
        assert!(store.load().expect("Load").is_none());

        clone.store(&sample_key()).expect("Store");
        assert_eq!(store.load().expect("Load"), Some(sample_key()));
    }
}
