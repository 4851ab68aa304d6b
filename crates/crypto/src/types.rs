//! Zeroizing key types
//!
//! Key material recovered by the KAS is held in these wrappers so it is
//! cleared from memory on drop.

use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// AES-256 key (32 bytes) that zeroizes on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AesKey(pub(crate) [u8; 32]);

impl AesKey {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != 32 {
            return Err(KeyError::InvalidLength {
                expected: 32,
                got: bytes.len(),
            });
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(bytes);
        Ok(AesKey(key))
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

/// Unwrapped object key
///
/// Object keys wrapped in KAOs are at most 256 bits; 128-bit keys are
/// accepted as well.
#[derive(Clone)]
pub struct SymmetricKey(Zeroizing<Vec<u8>>);

impl SymmetricKey {
    pub const MAX_LEN: usize = 32;

    pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.is_empty() || bytes.len() > Self::MAX_LEN {
            return Err(KeyError::InvalidLength {
                expected: Self::MAX_LEN,
                got: bytes.len(),
            });
        }
        Ok(Self(Zeroizing::new(bytes.to_vec())))
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<AesKey> for SymmetricKey {
    fn from(key: AesKey) -> Self {
        Self(Zeroizing::new(key.as_slice().to_vec()))
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SymmetricKey({} bytes)", self.0.len())
    }
}

/// 96-bit AES-GCM nonce
#[derive(Clone, Zeroize, ZeroizeOnDrop, Default)]
pub struct Nonce96(pub(crate) [u8; 12]);

impl Nonce96 {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != 12 {
            return Err(KeyError::InvalidLength {
                expected: 12,
                got: bytes.len(),
            });
        }
        let mut nonce = [0u8; 12];
        nonce.copy_from_slice(bytes);
        Ok(Nonce96(nonce))
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

/// Key-related errors
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("Invalid key length: expected {expected}, got {got}")]
    InvalidLength { expected: usize, got: usize },

    #[error("Unsupported PEM label '{0}'")]
    UnsupportedPem(String),

    #[error("Malformed key: {0}")]
    Malformed(String),
}
