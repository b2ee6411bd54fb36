// Store module: persistence of the provisioned tag key

pub mod backend;

pub use backend::{FileKeyStore, KeyStore, MemoryKeyStore, StoreError};
