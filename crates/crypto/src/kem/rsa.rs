//! RSA-OAEP Key Encapsulation Mechanism
//!
//! `wrapped` KAOs carry object keys encrypted with RSA-OAEP using SHA-1 for
//! both the OAEP digest and MGF1. The digest is fixed by wire compatibility
//! and must not be replaced with SHA-256 on this path.

use super::{KemError, KeyEncapsulation};
use crate::types::SymmetricKey;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::rngs::OsRng;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::Sha256;

/// OAEP hash algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OaepHash {
    #[default]
    Sha1,
    Sha256,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RsaOaepKem {
    pub hash: OaepHash,
}

impl RsaOaepKem {
    pub fn new(hash: OaepHash) -> Self {
        RsaOaepKem { hash }
    }

    pub fn with_sha1() -> Self {
        Self::new(OaepHash::Sha1)
    }

    fn padding(&self) -> Oaep {
        match self.hash {
            OaepHash::Sha1 => Oaep::new::<Sha1>(),
            OaepHash::Sha256 => Oaep::new::<Sha256>(),
        }
    }

    /// Unwrap an object key, enforcing the symmetric key size limit
    pub fn unwrap_key(&self, wrapped: &[u8], private_key: &RsaPrivateKey) -> Result<SymmetricKey, KemError> {
        let key = self.unwrap(&wrapped.to_vec(), private_key)?;
        SymmetricKey::from_slice(&key).map_err(|_| KemError::KeyTooLarge(key.len()))
    }
}

impl KeyEncapsulation for RsaOaepKem {
    type PublicKey = RsaPublicKey;
    type PrivateKey = RsaPrivateKey;
    type WrappedKey = Vec<u8>;

    fn wrap(&self, key: &[u8], public_key: &RsaPublicKey) -> Result<Vec<u8>, KemError> {
        if key.len() > SymmetricKey::MAX_LEN {
            return Err(KemError::KeyTooLarge(key.len()));
        }
        public_key
            .encrypt(&mut OsRng, self.padding(), key)
            .map_err(|e| KemError::WrapError(e.to_string()))
    }

    fn unwrap(&self, wrapped: &Vec<u8>, private_key: &RsaPrivateKey) -> Result<Vec<u8>, KemError> {
        private_key
            .decrypt(self.padding(), wrapped)
            .map_err(|_| KemError::UnwrapError)
    }
}

/// Wrap a key with RSA-OAEP-SHA1 under a PEM public key; returns base64
pub fn wrap_key_with_rsa_oaep(key: &[u8], public_key_pem: &str) -> Result<String, KemError> {
    let public_key =
        crate::keys::parse_rsa_public_pem(public_key_pem).map_err(|e| KemError::InvalidPublicKey(e.to_string()))?;
    let wrapped = RsaOaepKem::with_sha1().wrap(key, &public_key)?;
    Ok(BASE64.encode(wrapped))
}
