//! HMAC-SHA256 policy binding with constant-time verification
//!
//! The binding is HMAC(key = object key, msg = canonical policy bytes).
//! Producers encode it either as the raw 32-byte MAC or as its lowercase hex
//! string; both encodings are then base64-encoded into the KAO.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const MAC_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum HmacError {
    #[error("HMAC initialization failed")]
    InitFailed,

    #[error("HMAC verification failed")]
    VerificationFailed,

    #[error("Base64 decode error: {0}")]
    Base64Error(#[from] base64::DecodeError),
}

/// Calculate HMAC-SHA256 over data
pub fn calculate_hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, HmacError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| HmacError::InitFailed)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Policy binding in the SDK wire form: base64(hex(HMAC))
pub fn calculate_policy_binding(key: &[u8], canonical_policy: &[u8]) -> Result<String, HmacError> {
    let mac = calculate_hmac(key, canonical_policy)?;
    Ok(BASE64.encode(hex::encode(mac)))
}

/// Verify a decoded policy binding against the canonical policy bytes
///
/// `binding` is the base64-decoded `policyBinding`: either the raw MAC or its
/// lowercase hex string, matched byte for byte. The comparison is
/// constant-time in both cases.
pub fn verify_policy_binding(key: &[u8], canonical_policy: &[u8], binding: &[u8]) -> Result<(), HmacError> {
    let mac = calculate_hmac(key, canonical_policy)?;

    let matches = match binding.len() {
        MAC_LEN => bool::from(mac.as_slice().ct_eq(binding)),
        n if n == MAC_LEN * 2 => bool::from(hex::encode(&mac).as_bytes().ct_eq(binding)),
        _ => false,
    };

    if matches {
        Ok(())
    } else {
        Err(HmacError::VerificationFailed)
    }
}
