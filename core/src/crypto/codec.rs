// Key codec: RSA-512 public key <-> 64-byte little-endian modulus
//
// Tags never carry a full DER public key. The only thing provisioned,
// persisted and broadcast is the modulus, written little-endian into
// exactly 64 bytes. The public exponent is fixed at 65537, so any
// scanner can rebuild the owner's public key from those bytes alone.
//
// Reports are encrypted with PKCS#1 v1.5, the padding every deployed
// owner device decrypts.

use rsa::traits::PublicKeyParts;
use rsa::{BigUint, Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use std::fmt;
use thiserror::Error;

/// Size of the wire/persisted key representation
pub const KEY_MATERIAL_LEN: usize = 64;

/// Required modulus size in bits
pub const MODULUS_BITS: usize = 512;

/// Fixed RSA public exponent
pub const PUBLIC_EXPONENT: u32 = 65537;

/// PKCS#1 v1.5 padding overhead per block
const PKCS1_V15_OVERHEAD: usize = 11;

/// Largest plaintext that fits a single PKCS#1 v1.5 block for a 512-bit modulus
pub const MAX_PLAINTEXT_LEN: usize = KEY_MATERIAL_LEN - PKCS1_V15_OVERHEAD;

/// Errors for key encoding and report encryption
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("Invalid key material length: expected 64 bytes, got {0}")]
    InvalidLength(usize),
    #[error("Modulus is {0} bits, expected 512")]
    InvalidModulusBits(usize),
    #[error("Unsupported public exponent")]
    UnsupportedExponent,
    #[error("Invalid RSA key: {0}")]
    InvalidKey(String),
    #[error("Encryption failed: {0}")]
    Encrypt(String),
    #[error("Decryption failed: {0}")]
    Decrypt(String),
}

/// 64-byte little-endian encoding of a 512-bit RSA modulus
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct KeyMaterial([u8; KEY_MATERIAL_LEN]);

impl KeyMaterial {
    /// Build key material from a slice, which must be exactly 64 bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let raw: [u8; KEY_MATERIAL_LEN] = bytes
            .try_into()
            .map_err(|_| KeyError::InvalidLength(bytes.len()))?;
        Ok(Self(raw))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_MATERIAL_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<[u8; KEY_MATERIAL_LEN]> for KeyMaterial {
    fn from(raw: [u8; KEY_MATERIAL_LEN]) -> Self {
        Self(raw)
    }
}

impl AsRef<[u8]> for KeyMaterial {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyMaterial({}..)", hex::encode(&self.0[..8]))
    }
}

/// Rebuild an RSA public key from its 64-byte wire form.
///
/// The bytes are read as a little-endian unsigned modulus with exponent
/// 65537. Anything that does not come out as exactly 512 bits is rejected:
/// a corrupted fragment set must never produce a usable key.
pub fn decode_public_key(material: &KeyMaterial) -> Result<RsaPublicKey, KeyError> {
    let modulus = BigUint::from_bytes_le(material.as_bytes());
    let bits = modulus.bits();
    if bits != MODULUS_BITS {
        return Err(KeyError::InvalidModulusBits(bits));
    }

    RsaPublicKey::new(modulus, BigUint::from(PUBLIC_EXPONENT))
        .map_err(|e| KeyError::InvalidKey(e.to_string()))
}

/// Encode an RSA public key into its 64-byte wire form
pub fn encode_public_key(public_key: &RsaPublicKey) -> Result<KeyMaterial, KeyError> {
    if public_key.e() != &BigUint::from(PUBLIC_EXPONENT) {
        return Err(KeyError::UnsupportedExponent);
    }

    let bits = public_key.n().bits();
    if bits != MODULUS_BITS {
        return Err(KeyError::InvalidModulusBits(bits));
    }

    let le = public_key.n().to_bytes_le();
    let mut raw = [0u8; KEY_MATERIAL_LEN];
    raw[..le.len()].copy_from_slice(&le);
    Ok(KeyMaterial(raw))
}

/// Encrypt a report payload to a tag owner's public key (PKCS#1 v1.5)
pub fn encrypt(public_key: &RsaPublicKey, plaintext: &[u8]) -> Result<Vec<u8>, KeyError> {
    if plaintext.len() > MAX_PLAINTEXT_LEN {
        return Err(KeyError::Encrypt(format!(
            "payload is {} bytes, limit is {}",
            plaintext.len(),
            MAX_PLAINTEXT_LEN
        )));
    }

    public_key
        .encrypt(&mut rand::rngs::OsRng, Pkcs1v15Encrypt, plaintext)
        .map_err(|e| KeyError::Encrypt(e.to_string()))
}

/// Decrypt a report with the owner's private key (PKCS#1 v1.5)
pub fn decrypt(private_key: &RsaPrivateKey, ciphertext: &[u8]) -> Result<Vec<u8>, KeyError> {
    private_key
        .decrypt(Pkcs1v15Encrypt, ciphertext)
        .map_err(|e| KeyError::Decrypt(e.to_string()))
}
