// Identity: owner key pair and its on-disk PEM form

pub mod keys;

pub use keys::{load_public_key_material, IdentityError, OwnerKeys};
