//! Cryptographic helper functions
//!
//! Nonce and key generation shared by the AEAD and KEM modules.

use crate::types::Nonce96;
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid key length: {0}")]
    InvalidKeyLength(usize),

    #[error("Encryption failed")]
    EncryptionFailed,

    /// Wrong key, wrong IV or tampered ciphertext; the cause is not reported
    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Ciphertext too short: {0} bytes")]
    Truncated(usize),

    #[error("Malformed encrypted metadata: {0}")]
    MalformedMetadata(String),

    #[error("Signature verification failed")]
    SignatureInvalid,

    #[error("Malformed signature: {0}")]
    MalformedSignature(String),
}

/// Generate a random 96-bit nonce for AES-GCM
pub fn generate_nonce() -> Nonce96 {
    let mut nonce = Nonce96::default();
    OsRng.fill_bytes(nonce.as_mut_slice());
    nonce
}

/// Generate a random 32-byte key
pub fn generate_key_32() -> [u8; 32] {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    key
}
