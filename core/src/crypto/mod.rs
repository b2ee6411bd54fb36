// Cryptography module: key material codec and report encryption

pub mod codec;

pub use codec::{
    decode_public_key, decrypt, encode_public_key, encrypt, KeyError, KeyMaterial,
    KEY_MATERIAL_LEN, MAX_PLAINTEXT_LEN, MODULUS_BITS, PUBLIC_EXPONENT,
};
