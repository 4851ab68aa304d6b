//! NanoTDF policy binding signatures
//!
//! ECDSA bindings are fixed-width `r ‖ s` (64 bytes) over the policy body.
//! GMAC-mode bindings are the trailing 8 bytes of SHA-256(policy body).

use crate::helpers::CryptoError;
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::{PublicKey, SecretKey};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

pub const ECDSA_P256_SIGNATURE_LEN: usize = 64;
pub const GMAC_BINDING_LEN: usize = 8;

/// Verify an `r ‖ s` ECDSA-P256-SHA256 signature
pub fn verify_ecdsa_p256(public_key: &PublicKey, message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
    if signature.len() != ECDSA_P256_SIGNATURE_LEN {
        return Err(CryptoError::MalformedSignature(format!(
            "expected {} bytes, got {}",
            ECDSA_P256_SIGNATURE_LEN,
            signature.len()
        )));
    }
    let signature = Signature::from_slice(signature).map_err(|e| CryptoError::MalformedSignature(e.to_string()))?;
    VerifyingKey::from(public_key)
        .verify(message, &signature)
        .map_err(|_| CryptoError::SignatureInvalid)
}

/// Sign with ECDSA-P256-SHA256 producing `r ‖ s`
pub fn sign_ecdsa_p256(secret_key: &SecretKey, message: &[u8]) -> [u8; ECDSA_P256_SIGNATURE_LEN] {
    let signature: Signature = SigningKey::from(secret_key).sign(message);
    let mut out = [0u8; ECDSA_P256_SIGNATURE_LEN];
    out.copy_from_slice(&signature.to_bytes());
    out
}

/// GMAC-mode binding for a policy body
pub fn gmac_binding(policy_body: &[u8]) -> [u8; GMAC_BINDING_LEN] {
    let digest = Sha256::digest(policy_body);
    let mut out = [0u8; GMAC_BINDING_LEN];
    out.copy_from_slice(&digest[digest.len() - GMAC_BINDING_LEN..]);
    out
}

pub fn verify_gmac_binding(policy_body: &[u8], binding: &[u8]) -> Result<(), CryptoError> {
    let expected = gmac_binding(policy_body);
    if binding.len() == GMAC_BINDING_LEN && bool::from(expected.as_slice().ct_eq(binding)) {
        Ok(())
    } else {
        Err(CryptoError::SignatureInvalid)
    }
}
