//! KAS key management
//!
//! Keys are loaded once at start-up and read-only afterwards. The RSA pair
//! serves `wrapped` KAOs; the P-256 pair serves NanoTDF rewraps and, when
//! present, signs responses.

use crate::error::KeyMasterError;
use jsonwebtoken::{Algorithm, EncodingKey};
use opentdf_crypto::keys::{self, KeyFamily};
use p256::pkcs8::EncodePrivateKey as _;
use rand::rngs::OsRng;
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::collections::HashMap;
use tracing::{debug, info};
use zeroize::Zeroizing;

pub const KAS_PUBLIC: &str = "KAS-PUBLIC";
pub const KAS_PRIVATE: &str = "KAS-PRIVATE";
pub const KAS_EC_PUBLIC: &str = "KAS-EC-SECP256R1-PUBLIC";
pub const KAS_EC_PRIVATE: &str = "KAS-EC-SECP256R1-PRIVATE";

pub const ALGORITHM_RSA_2048: &str = "rsa:2048";
pub const ALGORITHM_EC_SECP256R1: &str = "ec:secp256r1";

/// Key identifiers carried in KAOs
pub const KID_RSA: &str = "r1";
pub const KID_EC: &str = "e1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Symmetric,
    Public,
    Private,
}

/// A loaded public key
#[derive(Debug, Clone)]
pub enum PublicKeyMaterial {
    Rsa(RsaPublicKey),
    Ec(p256::PublicKey),
}

impl PublicKeyMaterial {
    pub fn to_pem(&self) -> Result<String, KeyMasterError> {
        let pem = match self {
            Self::Rsa(key) => keys::rsa_public_pem(key),
            Self::Ec(key) => keys::ec_public_pem(key),
        };
        pem.map_err(|e| KeyMasterError::InvalidKey {
            name: "public".to_string(),
            reason: e.to_string(),
        })
    }
}

/// A loaded private key
#[derive(Clone)]
pub enum PrivateKeyMaterial {
    Rsa(RsaPrivateKey),
    Ec(p256::SecretKey),
}

impl PrivateKeyMaterial {
    pub fn public_key(&self) -> PublicKeyMaterial {
        match self {
            Self::Rsa(key) => PublicKeyMaterial::Rsa(RsaPublicKey::from(key)),
            Self::Ec(key) => PublicKeyMaterial::Ec(key.public_key()),
        }
    }
}

impl std::fmt::Debug for PrivateKeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rsa(_) => f.write_str("PrivateKeyMaterial::Rsa(..)"),
            Self::Ec(_) => f.write_str("PrivateKeyMaterial::Ec(..)"),
        }
    }
}

enum KeyMaterial {
    Symmetric(Zeroizing<Vec<u8>>),
    Public(PublicKeyMaterial),
    Private(PrivateKeyMaterial),
}

impl KeyMaterial {
    fn kind(&self) -> KeyKind {
        match self {
            Self::Symmetric(_) => KeyKind::Symmetric,
            Self::Public(_) => KeyKind::Public,
            Self::Private(_) => KeyKind::Private,
        }
    }
}

/// Named key store
#[derive(Default)]
pub struct KeyMaster {
    keys: HashMap<String, KeyMaterial>,
}

impl KeyMaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh RSA-2048 and P-256 KAS key pairs
    pub fn generate() -> Result<Self, KeyMasterError> {
        let rsa_key = RsaPrivateKey::new(&mut OsRng, 2048).map_err(|e| KeyMasterError::InvalidKey {
            name: KAS_PRIVATE.to_string(),
            reason: e.to_string(),
        })?;
        let ec = p256::SecretKey::random(&mut OsRng);

        let mut master = Self::new();
        master.insert_private(KAS_PRIVATE, PrivateKeyMaterial::Rsa(rsa_key));
        master.insert_private(KAS_EC_PRIVATE, PrivateKeyMaterial::Ec(ec));
        Ok(master)
    }

    /// Load the KAS keys from PEM blobs or paths
    ///
    /// Public keys (or certificates) are optional; when absent they are
    /// derived from the private keys.
    pub fn load(
        rsa_private: Option<&str>,
        rsa_public: Option<&str>,
        ec_private: Option<&str>,
        ec_public: Option<&str>,
    ) -> Result<Self, KeyMasterError> {
        let mut master = Self::new();
        if let Some(value) = rsa_private {
            master.set_key_pem(KAS_PRIVATE, KeyKind::Private, &read_pem(value)?)?;
        }
        if let Some(value) = rsa_public {
            master.set_key_pem(KAS_PUBLIC, KeyKind::Public, &read_pem(value)?)?;
        }
        if let Some(value) = ec_private {
            master.set_key_pem(KAS_EC_PRIVATE, KeyKind::Private, &read_pem(value)?)?;
        }
        if let Some(value) = ec_public {
            master.set_key_pem(KAS_EC_PUBLIC, KeyKind::Public, &read_pem(value)?)?;
        }
        info!(keys = ?master.names(), "Loaded KAS keys");
        Ok(master)
    }

    /// Insert a private key and its derived public key under the paired name
    fn insert_private(&mut self, name: &str, key: PrivateKeyMaterial) {
        if let Some(public_name) = paired_public_name(name) {
            self.keys
                .entry(public_name.to_string())
                .or_insert_with(|| KeyMaterial::Public(key.public_key()));
        }
        self.keys.insert(name.to_string(), KeyMaterial::Private(key));
    }

    /// Parse and store a PEM key; certificates yield their public key
    pub fn set_key_pem(&mut self, name: &str, kind: KeyKind, pem: &str) -> Result<(), KeyMasterError> {
        let invalid = |e: opentdf_crypto::KeyError| KeyMasterError::InvalidKey {
            name: name.to_string(),
            reason: e.to_string(),
        };
        match kind {
            KeyKind::Public => {
                let key = match keys::public_key_family(pem).map_err(invalid)? {
                    KeyFamily::Rsa => PublicKeyMaterial::Rsa(keys::parse_rsa_public_pem(pem).map_err(invalid)?),
                    KeyFamily::EcP256 => PublicKeyMaterial::Ec(keys::parse_ec_public_pem(pem).map_err(invalid)?),
                };
                self.keys.insert(name.to_string(), KeyMaterial::Public(key));
            }
            KeyKind::Private => {
                let key = match keys::parse_rsa_private_pem(pem) {
                    Ok(key) => PrivateKeyMaterial::Rsa(key),
                    Err(_) => PrivateKeyMaterial::Ec(keys::parse_ec_private_pem(pem).map_err(invalid)?),
                };
                self.insert_private(name, key);
            }
            KeyKind::Symmetric => {
                return Err(KeyMasterError::WrongKind {
                    name: name.to_string(),
                    expected: "PEM",
                })
            }
        }
        debug!(name, ?kind, "Stored key");
        Ok(())
    }

    pub fn set_symmetric(&mut self, name: &str, key: &[u8]) {
        self.keys
            .insert(name.to_string(), KeyMaterial::Symmetric(Zeroizing::new(key.to_vec())));
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.keys.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn kind(&self, name: &str) -> Option<KeyKind> {
        self.keys.get(name).map(KeyMaterial::kind)
    }

    pub fn get_public(&self, name: &str) -> Result<&PublicKeyMaterial, KeyMasterError> {
        match self.keys.get(name) {
            Some(KeyMaterial::Public(key)) => Ok(key),
            Some(_) => Err(KeyMasterError::WrongKind {
                name: name.to_string(),
                expected: "public",
            }),
            None => Err(KeyMasterError::KeyNotFound(name.to_string())),
        }
    }

    pub fn get_private(&self, name: &str) -> Result<&PrivateKeyMaterial, KeyMasterError> {
        match self.keys.get(name) {
            Some(KeyMaterial::Private(key)) => Ok(key),
            Some(_) => Err(KeyMasterError::WrongKind {
                name: name.to_string(),
                expected: "private",
            }),
            None => Err(KeyMasterError::KeyNotFound(name.to_string())),
        }
    }

    pub fn get_symmetric(&self, name: &str) -> Result<&[u8], KeyMasterError> {
        match self.keys.get(name) {
            Some(KeyMaterial::Symmetric(key)) => Ok(key.as_slice()),
            Some(_) => Err(KeyMasterError::WrongKind {
                name: name.to_string(),
                expected: "symmetric",
            }),
            None => Err(KeyMasterError::KeyNotFound(name.to_string())),
        }
    }

    pub fn rsa_private(&self) -> Result<&RsaPrivateKey, KeyMasterError> {
        match self.get_private(KAS_PRIVATE)? {
            PrivateKeyMaterial::Rsa(key) => Ok(key),
            PrivateKeyMaterial::Ec(_) => Err(KeyMasterError::WrongKind {
                name: KAS_PRIVATE.to_string(),
                expected: "RSA",
            }),
        }
    }

    pub fn ec_private(&self) -> Result<&p256::SecretKey, KeyMasterError> {
        match self.get_private(KAS_EC_PRIVATE)? {
            PrivateKeyMaterial::Ec(key) => Ok(key),
            PrivateKeyMaterial::Rsa(_) => Err(KeyMasterError::WrongKind {
                name: KAS_EC_PRIVATE.to_string(),
                expected: "EC",
            }),
        }
    }

    /// Private key selected by a KAO `kid`
    pub fn private_for_kid(&self, kid: Option<&str>) -> Result<&PrivateKeyMaterial, KeyMasterError> {
        match kid {
            None | Some(KID_RSA) => self.get_private(KAS_PRIVATE),
            Some(KID_EC) => self.get_private(KAS_EC_PRIVATE),
            Some(other) => Err(KeyMasterError::KeyNotFound(format!("kid {}", other))),
        }
    }

    /// PEM suitable for publishing
    pub fn get_export_string(&self, name: &str) -> Result<String, KeyMasterError> {
        match self.keys.get(name) {
            Some(KeyMaterial::Public(key)) => key.to_pem(),
            Some(KeyMaterial::Private(key)) => key.public_key().to_pem(),
            Some(KeyMaterial::Symmetric(_)) => Err(KeyMasterError::WrongKind {
                name: name.to_string(),
                expected: "asymmetric",
            }),
            None => Err(KeyMasterError::KeyNotFound(name.to_string())),
        }
    }

    /// KAS public key PEM for an algorithm token; `rsa:2048` when absent
    pub fn kas_public_key(&self, algorithm: Option<&str>) -> Result<String, KeyMasterError> {
        match algorithm.unwrap_or(ALGORITHM_RSA_2048) {
            ALGORITHM_RSA_2048 => self.get_export_string(KAS_PUBLIC),
            ALGORITHM_EC_SECP256R1 => self.get_export_string(KAS_EC_PUBLIC),
            other => Err(KeyMasterError::UnsupportedAlgorithm(other.to_string())),
        }
    }

    /// Key used to sign rewrap responses: ES256 when an EC key is loaded, else RS256
    pub fn response_signing_key(&self) -> Result<(Algorithm, EncodingKey), KeyMasterError> {
        let invalid = |name: &str, reason: String| KeyMasterError::InvalidKey {
            name: name.to_string(),
            reason,
        };
        if let Ok(ec) = self.ec_private() {
            let pem = ec
                .to_pkcs8_pem(p256::pkcs8::LineEnding::LF)
                .map_err(|e| invalid(KAS_EC_PRIVATE, e.to_string()))?;
            let key = EncodingKey::from_ec_pem(pem.as_bytes()).map_err(|e| invalid(KAS_EC_PRIVATE, e.to_string()))?;
            return Ok((Algorithm::ES256, key));
        }
        let private = self.rsa_private()?;
        let pem = rsa::pkcs1::EncodeRsaPrivateKey::to_pkcs1_pem(private, rsa::pkcs1::LineEnding::LF)
            .map_err(|e| invalid(KAS_PRIVATE, e.to_string()))?;
        let key = EncodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| invalid(KAS_PRIVATE, e.to_string()))?;
        Ok((Algorithm::RS256, key))
    }

    /// True when at least one KAS private key is loaded
    pub fn is_ready(&self) -> bool {
        self.get_private(KAS_PRIVATE).is_ok() || self.get_private(KAS_EC_PRIVATE).is_ok()
    }
}

fn paired_public_name(private_name: &str) -> Option<&'static str> {
    match private_name {
        KAS_PRIVATE => Some(KAS_PUBLIC),
        KAS_EC_PRIVATE => Some(KAS_EC_PUBLIC),
        _ => None,
    }
}

/// Inline PEM is used as-is; anything else is read as a file path
pub fn read_pem(value: &str) -> Result<String, KeyMasterError> {
    if value.contains("-----BEGIN") {
        return Ok(value.to_string());
    }
    std::fs::read_to_string(value).map_err(|e| KeyMasterError::Io {
        path: value.to_string(),
        reason: e.to_string(),
    })
}
