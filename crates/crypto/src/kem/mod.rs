//! Key Encapsulation Mechanisms (KEM)
//!
//! RSA-OAEP wraps object keys for `wrapped` KAOs; P-256 ECDH with HKDF
//! derives and wraps keys for the NanoTDF form.

use thiserror::Error;

pub mod ec;
pub mod rsa;

#[derive(Debug, Error)]
pub enum KemError {
    #[error("Key wrapping failed: {0}")]
    WrapError(String),

    /// Unwrap failures never carry operand material
    #[error("Key unwrapping failed")]
    UnwrapError,

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Key derivation failed")]
    KeyDerivationFailed,

    #[error("Wrapped key too large: {0} bytes")]
    KeyTooLarge(usize),
}

/// Wrap and unwrap a symmetric key under an asymmetric key pair
pub trait KeyEncapsulation {
    type PublicKey;
    type PrivateKey;
    type WrappedKey;

    fn wrap(&self, key: &[u8], public_key: &Self::PublicKey) -> Result<Self::WrappedKey, KemError>;

    fn unwrap(&self, wrapped: &Self::WrappedKey, private_key: &Self::PrivateKey) -> Result<Vec<u8>, KemError>;
}
