//! P-256 key agreement for NanoTDF
//!
//! The shared secret is the x-coordinate of the ECDH point. Keys are derived
//! from it with HKDF-SHA256 using the NanoTDF salt and an empty info string.

use super::{KemError, KeyEncapsulation};
use crate::aead;
use crate::types::AesKey;
use hkdf::Hkdf;
use p256::elliptic_curve::point::AffineCoordinates;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// NanoTDF magic number prefix
pub const NANOTDF_MAGIC: &[u8] = b"L1";

/// Compressed SEC1 P-256 point length
pub const COMPRESSED_POINT_LEN: usize = 33;

/// HKDF salt for a NanoTDF version byte: SHA256("L1" ‖ version)
pub fn nanotdf_salt(version: u8) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(NANOTDF_MAGIC);
    hasher.update([version]);
    hasher.finalize().into()
}

/// ECDH returning the x-coordinate of the shared point
pub fn ecdh_x_coordinate(private_key: &SecretKey, public_key: &PublicKey) -> Zeroizing<[u8; 32]> {
    let scalar = private_key.to_nonzero_scalar();
    let shared = (public_key.to_projective() * *scalar).to_affine();
    let mut out = Zeroizing::new([0u8; 32]);
    out.copy_from_slice(&shared.x());
    out
}

/// HKDF-SHA256 expansion of a shared secret into an AES-256 key
pub fn derive_key(shared_secret: &[u8], salt: &[u8], info: &[u8]) -> Result<AesKey, KemError> {
    let hkdf = Hkdf::<Sha256>::new(Some(salt), shared_secret);
    let mut key = Zeroizing::new([0u8; 32]);
    hkdf.expand(info, key.as_mut()).map_err(|_| KemError::KeyDerivationFailed)?;
    AesKey::from_slice(key.as_ref()).map_err(|_| KemError::KeyDerivationFailed)
}

/// Parse a compressed or uncompressed SEC1 point
pub fn parse_point(bytes: &[u8]) -> Result<PublicKey, KemError> {
    PublicKey::from_sec1_bytes(bytes).map_err(|e| KemError::InvalidPublicKey(e.to_string()))
}

pub fn compressed_point(public_key: &PublicKey) -> Vec<u8> {
    public_key.to_encoded_point(true).as_bytes().to_vec()
}

/// ECDH + HKDF + AES-GCM key wrapping
///
/// A wrapped key is `ephemeral public key (33) ‖ iv ‖ ciphertext ‖ tag`.
#[derive(Debug, Clone)]
pub struct EcdhKem {
    salt: [u8; 32],
}

impl Default for EcdhKem {
    fn default() -> Self {
        // NanoTDF v1.2 ("L1L")
        Self::new(b'L')
    }
}

impl EcdhKem {
    pub fn new(version: u8) -> Self {
        Self {
            salt: nanotdf_salt(version),
        }
    }

    pub fn salt(&self) -> &[u8; 32] {
        &self.salt
    }

    /// Key shared between `private_key` and `public_key`
    pub fn derive(&self, private_key: &SecretKey, public_key: &PublicKey) -> Result<AesKey, KemError> {
        let shared = ecdh_x_coordinate(private_key, public_key);
        derive_key(shared.as_ref(), &self.salt, b"")
    }

    /// Wrap under a fresh ephemeral key; returns the ephemeral public key and `iv ‖ ct ‖ tag`
    pub fn wrap_ephemeral(&self, key: &[u8], recipient: &PublicKey) -> Result<(PublicKey, Vec<u8>), KemError> {
        let ephemeral = SecretKey::random(&mut OsRng);
        let wrapping_key = self.derive(&ephemeral, recipient)?;
        let sealed = aead::encrypt(wrapping_key.as_slice(), key).map_err(|e| KemError::WrapError(e.to_string()))?;
        Ok((ephemeral.public_key(), sealed))
    }
}

impl KeyEncapsulation for EcdhKem {
    type PublicKey = PublicKey;
    type PrivateKey = SecretKey;
    type WrappedKey = Vec<u8>;

    fn wrap(&self, key: &[u8], public_key: &PublicKey) -> Result<Vec<u8>, KemError> {
        let (ephemeral, sealed) = self.wrap_ephemeral(key, public_key)?;
        let mut out = compressed_point(&ephemeral);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn unwrap(&self, wrapped: &Vec<u8>, private_key: &SecretKey) -> Result<Vec<u8>, KemError> {
        if wrapped.len() <= COMPRESSED_POINT_LEN {
            return Err(KemError::UnwrapError);
        }
        let (point, sealed) = wrapped.split_at(COMPRESSED_POINT_LEN);
        let ephemeral = parse_point(point)?;
        let wrapping_key = self.derive(private_key, &ephemeral)?;
        aead::decrypt(wrapping_key.as_slice(), sealed).map_err(|_| KemError::UnwrapError)
    }
}
