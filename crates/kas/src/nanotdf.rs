//! NanoTDF header parsing for the EC rewrap path
//!
//! ```text
//! magic+version (3) ‖ KAS locator ‖ ecc+binding mode (1) ‖ payload config (1)
//!   ‖ policy: type (1) ‖ length (2, BE) ‖ body ‖ binding ‖ ephemeral key (33)
//! ```
//!
//! Only secp256r1 headers with embedded policies are accepted.

use crate::error::NanoTdfError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use opentdf_crypto::kem::ec::{derive_key, ecdh_x_coordinate, nanotdf_salt, parse_point, COMPRESSED_POINT_LEN};
use opentdf_crypto::signature::{verify_ecdsa_p256, verify_gmac_binding, ECDSA_P256_SIGNATURE_LEN, GMAC_BINDING_LEN};
use opentdf_crypto::{aead, AesKey};
use std::io::{Cursor, Read};

/// "L1" followed by the version character
pub const MAGIC_PREFIX: &[u8; 2] = b"L1";
pub const VERSION_V12: u8 = b'L';
pub const VERSION_V13: u8 = b'M';

const ECDSA_BINDING_FLAG: u8 = 0x80;
const CURVE_SECP256R1: u8 = 0x00;
const CIPHER_AES256_GCM_128: u8 = 0x05;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocatorProtocol {
    Http,
    Https,
}

/// KAS resource locator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLocator {
    pub protocol: LocatorProtocol,
    pub body: String,
    pub identifier: Option<Vec<u8>>,
}

impl ResourceLocator {
    pub fn url(&self) -> String {
        match self.protocol {
            LocatorProtocol::Http => format!("http://{}", self.body),
            LocatorProtocol::Https => format!("https://{}", self.body),
        }
    }

    fn read(reader: &mut Cursor<&[u8]>) -> Result<Self, NanoTdfError> {
        let byte = read_u8(reader)?;
        let protocol = match byte & 0x0F {
            0x0 => LocatorProtocol::Http,
            0x1 => LocatorProtocol::Https,
            other => return Err(NanoTdfError::Unsupported(format!("locator protocol 0x{:X}", other))),
        };
        let identifier_len = match byte >> 4 {
            0x0 => 0,
            0x1 => 2,
            0x2 => 8,
            0x3 => 32,
            other => return Err(NanoTdfError::InvalidHeader(format!("locator identifier type 0x{:X}", other))),
        };
        let body_len = read_u8(reader)? as usize;
        let body = read_vec(reader, body_len)?;
        let body = String::from_utf8(body).map_err(|_| NanoTdfError::InvalidHeader("locator body".to_string()))?;
        let identifier = if identifier_len > 0 {
            Some(read_vec(reader, identifier_len)?)
        } else {
            None
        };
        Ok(Self {
            protocol,
            body,
            identifier,
        })
    }

    fn write(&self, out: &mut Vec<u8>) {
        let identifier_bits = match self.identifier.as_ref().map(Vec::len) {
            Some(2) => 0x10,
            Some(8) => 0x20,
            Some(32) => 0x30,
            _ => 0x00,
        };
        let protocol_bits = match self.protocol {
            LocatorProtocol::Http => 0x0,
            LocatorProtocol::Https => 0x1,
        };
        out.push(identifier_bits | protocol_bits);
        out.push(self.body.len() as u8);
        out.extend_from_slice(self.body.as_bytes());
        if let Some(identifier) = &self.identifier {
            out.extend_from_slice(identifier);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingMode {
    Ecdsa,
    Gmac,
}

impl BindingMode {
    fn binding_len(self) -> usize {
        match self {
            BindingMode::Ecdsa => ECDSA_P256_SIGNATURE_LEN,
            BindingMode::Gmac => GMAC_BINDING_LEN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    EmbeddedPlaintext,
    EmbeddedEncrypted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NanoTdfHeader {
    pub version: u8,
    pub kas: ResourceLocator,
    pub binding_mode: BindingMode,
    pub payload_config: u8,
    pub policy_kind: PolicyKind,
    pub policy_body: Vec<u8>,
    pub policy_binding: Vec<u8>,
    pub ephemeral_key: Vec<u8>,
}

impl NanoTdfHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self, NanoTdfError> {
        let mut reader = Cursor::new(bytes);

        let magic = read_vec(&mut reader, 3)?;
        if &magic[..2] != MAGIC_PREFIX {
            return Err(NanoTdfError::InvalidMagic);
        }
        let version = magic[2];
        if version != VERSION_V12 && version != VERSION_V13 {
            return Err(NanoTdfError::Unsupported(format!("version 0x{:02X}", version)));
        }

        let kas = ResourceLocator::read(&mut reader)?;

        let ecc_mode = read_u8(&mut reader)?;
        if ecc_mode & 0x07 != CURVE_SECP256R1 {
            return Err(NanoTdfError::Unsupported(format!("curve 0x{:X}", ecc_mode & 0x07)));
        }
        let binding_mode = if ecc_mode & ECDSA_BINDING_FLAG != 0 {
            BindingMode::Ecdsa
        } else {
            BindingMode::Gmac
        };

        let payload_config = read_u8(&mut reader)?;

        let policy_kind = match read_u8(&mut reader)? {
            0x01 => PolicyKind::EmbeddedPlaintext,
            0x02 => PolicyKind::EmbeddedEncrypted,
            other => return Err(NanoTdfError::Unsupported(format!("policy type 0x{:02X}", other))),
        };
        if policy_kind == PolicyKind::EmbeddedEncrypted && payload_config & 0x0F != CIPHER_AES256_GCM_128 {
            return Err(NanoTdfError::Unsupported(format!(
                "policy cipher 0x{:X}",
                payload_config & 0x0F
            )));
        }
        let policy_len = read_u16_be(&mut reader)? as usize;
        let policy_body = read_vec(&mut reader, policy_len)?;
        let policy_binding = read_vec(&mut reader, binding_mode.binding_len())?;
        let ephemeral_key = read_vec(&mut reader, COMPRESSED_POINT_LEN)?;

        Ok(Self {
            version,
            kas,
            binding_mode,
            payload_config,
            policy_kind,
            policy_body,
            policy_binding,
            ephemeral_key,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + self.policy_body.len());
        out.extend_from_slice(MAGIC_PREFIX);
        out.push(self.version);
        self.kas.write(&mut out);
        let binding_bit = match self.binding_mode {
            BindingMode::Ecdsa => ECDSA_BINDING_FLAG,
            BindingMode::Gmac => 0,
        };
        out.push(binding_bit | CURVE_SECP256R1);
        out.push(self.payload_config);
        out.push(match self.policy_kind {
            PolicyKind::EmbeddedPlaintext => 0x01,
            PolicyKind::EmbeddedEncrypted => 0x02,
        });
        out.extend_from_slice(&(self.policy_body.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.policy_body);
        out.extend_from_slice(&self.policy_binding);
        out.extend_from_slice(&self.ephemeral_key);
        out
    }

    pub fn salt(&self) -> [u8; 32] {
        nanotdf_salt(self.version)
    }

    /// Object key shared between the KAS and the ephemeral key
    pub fn object_key(&self, kas_private: &p256::SecretKey) -> Result<AesKey, NanoTdfError> {
        let ephemeral = parse_point(&self.ephemeral_key)
            .map_err(|e| NanoTdfError::InvalidHeader(format!("ephemeral key: {}", e)))?;
        let shared = ecdh_x_coordinate(kas_private, &ephemeral);
        derive_key(shared.as_ref(), &self.salt(), b"").map_err(|_| NanoTdfError::KeyDerivation)
    }

    /// Check the policy binding over the policy body as carried in the header
    pub fn verify_binding(&self) -> Result<(), NanoTdfError> {
        match self.binding_mode {
            BindingMode::Ecdsa => {
                let ephemeral = parse_point(&self.ephemeral_key)
                    .map_err(|e| NanoTdfError::InvalidHeader(format!("ephemeral key: {}", e)))?;
                verify_ecdsa_p256(&ephemeral, &self.policy_body, &self.policy_binding)
                    .map_err(|_| NanoTdfError::BindingMismatch)
            }
            BindingMode::Gmac => {
                verify_gmac_binding(&self.policy_body, &self.policy_binding).map_err(|_| NanoTdfError::BindingMismatch)
            }
        }
    }

    /// Plaintext policy JSON, decrypting embedded encrypted policies
    pub fn policy_plaintext(&self, object_key: &AesKey) -> Result<Vec<u8>, NanoTdfError> {
        match self.policy_kind {
            PolicyKind::EmbeddedPlaintext => Ok(self.policy_body.clone()),
            PolicyKind::EmbeddedEncrypted => aead::decrypt_with_iv(object_key.as_slice(), &[0u8; 12], &self.policy_body)
                .map_err(|_| NanoTdfError::PolicyDecryption),
        }
    }

    /// Canonical policy string: base64 of the plaintext policy JSON
    pub fn canonical_policy(&self, object_key: &AesKey) -> Result<String, NanoTdfError> {
        Ok(BASE64.encode(self.policy_plaintext(object_key)?))
    }
}

fn read_u8(reader: &mut Cursor<&[u8]>) -> Result<u8, NanoTdfError> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf).map_err(|_| NanoTdfError::Truncated)?;
    Ok(buf[0])
}

fn read_u16_be(reader: &mut Cursor<&[u8]>) -> Result<u16, NanoTdfError> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf).map_err(|_| NanoTdfError::Truncated)?;
    Ok(u16::from_be_bytes(buf))
}

fn read_vec(reader: &mut Cursor<&[u8]>, len: usize) -> Result<Vec<u8>, NanoTdfError> {
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).map_err(|_| NanoTdfError::Truncated)?;
    Ok(buf)
}
