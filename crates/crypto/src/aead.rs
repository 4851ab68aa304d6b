//! AES-GCM with 96-bit IVs and 128-bit tags
//!
//! Ciphertexts are laid out as `iv ‖ ciphertext ‖ tag`. Both 128-bit and
//! 256-bit keys are accepted.

use crate::helpers::{generate_nonce, CryptoError};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};

pub const IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

fn seal(key: &[u8], iv: &[u8; IV_LEN], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let nonce = Nonce::from_slice(iv);
    match key.len() {
        16 => Aes128Gcm::new_from_slice(key)
            .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::EncryptionFailed),
        32 => Aes256Gcm::new_from_slice(key)
            .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::EncryptionFailed),
        n => Err(CryptoError::InvalidKeyLength(n)),
    }
}

fn open(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let nonce = Nonce::from_slice(iv);
    match key.len() {
        16 => Aes128Gcm::new_from_slice(key)
            .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed),
        32 => Aes256Gcm::new_from_slice(key)
            .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed),
        n => Err(CryptoError::InvalidKeyLength(n)),
    }
}

/// Encrypt under a fresh random IV; returns `iv ‖ ciphertext ‖ tag`
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let nonce = generate_nonce();
    let mut iv = [0u8; IV_LEN];
    iv.copy_from_slice(nonce.as_slice());
    encrypt_with_iv(key, &iv, plaintext)
}

/// Encrypt under a caller-chosen IV; returns `iv ‖ ciphertext ‖ tag`
pub fn encrypt_with_iv(key: &[u8], iv: &[u8; IV_LEN], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let sealed = seal(key, iv, plaintext)?;
    let mut out = Vec::with_capacity(IV_LEN + sealed.len());
    out.extend_from_slice(iv);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Decrypt `iv ‖ ciphertext ‖ tag`
pub fn decrypt(key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < IV_LEN + TAG_LEN {
        return Err(CryptoError::Truncated(data.len()));
    }
    let (iv, rest) = data.split_at(IV_LEN);
    open(key, iv, rest)
}

/// Decrypt `ciphertext ‖ tag` under an explicit IV
pub fn decrypt_with_iv(key: &[u8], iv: &[u8; IV_LEN], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < TAG_LEN {
        return Err(CryptoError::Truncated(data.len()));
    }
    open(key, iv, data)
}

/// Wire form of a KAO's `encryptedMetadata` once base64-decoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedMetadata {
    /// Base64 IV, informational; the authoritative IV prefixes `ciphertext`
    pub iv: String,
    /// Base64 of `iv ‖ ciphertext ‖ tag`
    pub ciphertext: String,
}

impl EncryptedMetadata {
    /// Encrypt a JSON metadata value and produce the base64 wire string
    pub fn seal(key: &[u8], metadata: &serde_json::Value) -> Result<String, CryptoError> {
        let plaintext = serde_json::to_vec(metadata).map_err(|e| CryptoError::MalformedMetadata(e.to_string()))?;
        let sealed = encrypt(key, &plaintext)?;
        let envelope = EncryptedMetadata {
            iv: BASE64.encode(&sealed[..IV_LEN]),
            ciphertext: BASE64.encode(&sealed),
        };
        let json = serde_json::to_vec(&envelope).map_err(|e| CryptoError::MalformedMetadata(e.to_string()))?;
        Ok(BASE64.encode(json))
    }

    /// Decode the base64 wire string and decrypt it into JSON
    pub fn open(key: &[u8], encoded: &str) -> Result<serde_json::Value, CryptoError> {
        let json = BASE64
            .decode(encoded.trim())
            .map_err(|e| CryptoError::MalformedMetadata(e.to_string()))?;
        let envelope: EncryptedMetadata =
            serde_json::from_slice(&json).map_err(|e| CryptoError::MalformedMetadata(e.to_string()))?;
        let sealed = BASE64
            .decode(&envelope.ciphertext)
            .map_err(|e| CryptoError::MalformedMetadata(e.to_string()))?;
        let plaintext = decrypt(key, &sealed)?;
        serde_json::from_slice(&plaintext).map_err(|e| CryptoError::MalformedMetadata(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::generate_key_32;

    #[test]
    fn test_aes256_roundtrip() {
        let key = generate_key_32();
        let sealed = encrypt(&key, b"attack at dawn").unwrap();
        assert_eq!(sealed.len(), IV_LEN + 14 + TAG_LEN);
        assert_eq!(decrypt(&key, &sealed).unwrap(), b"attack at dawn");
    }

    #[test]
    fn test_aes128_key() {
        let key = [9u8; 16];
        let sealed = encrypt(&key, b"short key").unwrap();
        assert_eq!(decrypt(&key, &sealed).unwrap(), b"short key");
    }

    #[test]
    fn test_tamper_detected() {
        let key = generate_key_32();
        let mut sealed = encrypt(&key, b"payload").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(matches!(decrypt(&key, &sealed), Err(CryptoError::DecryptionFailed)));
        assert!(matches!(decrypt(&key, &sealed[..10]), Err(CryptoError::Truncated(10))));
        assert!(matches!(encrypt(&[0u8; 20], b"x"), Err(CryptoError::InvalidKeyLength(20))));
    }

    #[test]
    fn test_metadata_envelope() {
        let key = generate_key_32();
        let metadata = serde_json::json!({"owner": "alice", "tags": [1, 2]});
        let encoded = EncryptedMetadata::seal(&key, &metadata).unwrap();
        assert_eq!(EncryptedMetadata::open(&key, &encoded).unwrap(), metadata);

        let other = generate_key_32();
        assert!(EncryptedMetadata::open(&other, &encoded).is_err());
        assert!(matches!(
            EncryptedMetadata::open(&key, "not base64!"),
            Err(CryptoError::MalformedMetadata(_))
        ));
    }
}
