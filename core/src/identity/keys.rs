// Owner key pair management
//
// The owner holds an RSA-512 key pair (e = 65537) as two PEM files:
// PKCS#8 private key and SubjectPublicKeyInfo public key. Only the
// modulus of the public half ever leaves the owner device.

use crate::crypto::{encode_public_key, KeyError, KeyMaterial, MODULUS_BITS, PUBLIC_EXPONENT};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Errors for owner key files
#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Key file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("PEM encoding error: {0}")]
    Pem(String),
    #[error("Key generation failed: {0}")]
    Generation(String),
    #[error(transparent)]
    Key(#[from] KeyError),
}

/// Owner key pair used to provision tags and decrypt their reports
#[derive(Clone)]
pub struct OwnerKeys {
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
}

impl OwnerKeys {
    /// Generate a new 512-bit key pair with the fixed public exponent
    pub fn generate() -> Result<Self, IdentityError> {
        let private_key = RsaPrivateKey::new_with_exp(
            &mut rand::rngs::OsRng,
            MODULUS_BITS,
            &BigUint::from(PUBLIC_EXPONENT),
        )
        .map_err(|e| IdentityError::Generation(e.to_string()))?;
        Ok(Self::from_private_key(private_key))
    }

    pub fn from_private_key(private_key: RsaPrivateKey) -> Self {
        let public_key = RsaPublicKey::from(&private_key);
        Self {
            private_key,
            public_key,
        }
    }

    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    /// The 64-byte form provisioned onto tags and used as the directory key
    pub fn key_material(&self) -> Result<KeyMaterial, IdentityError> {
        Ok(encode_public_key(&self.public_key)?)
    }

    /// Write both halves as PEM files
    pub fn save_pem(&self, private_path: &Path, public_path: &Path) -> Result<(), IdentityError> {
        let private_pem = self
            .private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| IdentityError::Pem(e.to_string()))?;
        let public_pem = self
            .public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| IdentityError::Pem(e.to_string()))?;

        for path in [private_path, public_path] {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(private_path, private_pem.as_bytes())?;
        fs::write(public_path, public_pem.as_bytes())?;
        Ok(())
    }

    /// Load the key pair from its private PEM file
    pub fn load_private_pem(path: &Path) -> Result<Self, IdentityError> {
        let pem = fs::read_to_string(path)?;
        let private_key = RsaPrivateKey::from_pkcs8_pem(&pem)
            .map_err(|e| IdentityError::Pem(e.to_string()))?;
        Ok(Self::from_private_key(private_key))
    }
}

/// Load a public PEM file and extract the tag key material from it
pub fn load_public_key_material(path: &Path) -> Result<KeyMaterial, IdentityError> {
    let pem = fs::read_to_string(path)?;
    let public_key =
        RsaPublicKey::from_public_key_pem(&pem).map_err(|e| IdentityError::Pem(e.to_string()))?;
    Ok(encode_public_key(&public_key)?)
}
