//! PEM decoding for KAS and client keys
//!
//! Public-key inputs may be SPKI (`PUBLIC KEY`), PKCS#1 (`RSA PUBLIC KEY`) or
//! an X.509 `CERTIFICATE`, whose subject public key is used. Private keys may
//! be PKCS#8 or the legacy PKCS#1 / SEC1 forms.

use crate::types::KeyError;
use pkcs8::{DecodePrivateKey as _, DecodePublicKey as _, EncodePublicKey as _};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use x509_cert::der::{Decode, Encode};
use x509_cert::Certificate;

/// Key family recognised in a public-key PEM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    Rsa,
    EcP256,
}

fn parse_pem(input: &str) -> Result<pem::Pem, KeyError> {
    pem::parse(input.trim()).map_err(|e| KeyError::Malformed(e.to_string()))
}

/// SPKI DER of a public-key PEM, unwrapping certificates
fn spki_der(block: &pem::Pem) -> Result<Vec<u8>, KeyError> {
    match block.tag() {
        "PUBLIC KEY" => Ok(block.contents().to_vec()),
        "CERTIFICATE" => {
            let cert = Certificate::from_der(block.contents()).map_err(|e| KeyError::Malformed(e.to_string()))?;
            cert.tbs_certificate
                .subject_public_key_info
                .to_der()
                .map_err(|e| KeyError::Malformed(e.to_string()))
        }
        other => Err(KeyError::UnsupportedPem(other.to_string())),
    }
}

pub fn parse_rsa_public_pem(input: &str) -> Result<RsaPublicKey, KeyError> {
    let block = parse_pem(input)?;
    if block.tag() == "RSA PUBLIC KEY" {
        return RsaPublicKey::from_pkcs1_der(block.contents()).map_err(|e| KeyError::Malformed(e.to_string()));
    }
    let der = spki_der(&block)?;
    RsaPublicKey::from_public_key_der(&der).map_err(|e| KeyError::Malformed(e.to_string()))
}

pub fn parse_rsa_private_pem(input: &str) -> Result<RsaPrivateKey, KeyError> {
    let block = parse_pem(input)?;
    match block.tag() {
        "PRIVATE KEY" => {
            RsaPrivateKey::from_pkcs8_der(block.contents()).map_err(|e| KeyError::Malformed(e.to_string()))
        }
        "RSA PRIVATE KEY" => {
            RsaPrivateKey::from_pkcs1_der(block.contents()).map_err(|e| KeyError::Malformed(e.to_string()))
        }
        other => Err(KeyError::UnsupportedPem(other.to_string())),
    }
}

pub fn parse_ec_public_pem(input: &str) -> Result<p256::PublicKey, KeyError> {
    let block = parse_pem(input)?;
    let der = spki_der(&block)?;
    p256::PublicKey::from_public_key_der(&der).map_err(|e| KeyError::Malformed(e.to_string()))
}

pub fn parse_ec_private_pem(input: &str) -> Result<p256::SecretKey, KeyError> {
    let block = parse_pem(input)?;
    match block.tag() {
        "PRIVATE KEY" => {
            p256::SecretKey::from_pkcs8_der(block.contents()).map_err(|e| KeyError::Malformed(e.to_string()))
        }
        "EC PRIVATE KEY" => {
            p256::SecretKey::from_sec1_der(block.contents()).map_err(|e| KeyError::Malformed(e.to_string()))
        }
        other => Err(KeyError::UnsupportedPem(other.to_string())),
    }
}

/// Identify whether a public-key PEM (or certificate) holds an RSA or P-256 key
pub fn public_key_family(input: &str) -> Result<KeyFamily, KeyError> {
    if parse_rsa_public_pem(input).is_ok() {
        Ok(KeyFamily::Rsa)
    } else if parse_ec_public_pem(input).is_ok() {
        Ok(KeyFamily::EcP256)
    } else {
        Err(KeyError::Malformed("not an RSA or P-256 public key".to_string()))
    }
}

/// SPKI PEM of an RSA public key
pub fn rsa_public_pem(key: &RsaPublicKey) -> Result<String, KeyError> {
    key.to_public_key_pem(rsa::pkcs8::LineEnding::LF)
        .map_err(|e| KeyError::Malformed(e.to_string()))
}

/// SPKI PEM of a P-256 public key
pub fn ec_public_pem(key: &p256::PublicKey) -> Result<String, KeyError> {
    key.to_public_key_pem(p256::pkcs8::LineEnding::LF)
        .map_err(|e| KeyError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::pkcs8::EncodePrivateKey as _;
    use rand::rngs::OsRng;

    #[test]
    fn test_ec_pem_roundtrip() {
        let secret = p256::SecretKey::random(&mut OsRng);
        let private_pem = secret.to_pkcs8_pem(p256::pkcs8::LineEnding::LF).unwrap();
        let public_pem = ec_public_pem(&secret.public_key()).unwrap();

        let parsed = parse_ec_private_pem(&private_pem).unwrap();
        assert_eq!(parsed.public_key(), secret.public_key());
        assert_eq!(parse_ec_public_pem(&public_pem).unwrap(), secret.public_key());
        assert_eq!(public_key_family(&public_pem).unwrap(), KeyFamily::EcP256);
    }

    #[test]
    fn test_rsa_pem_roundtrip() {
        let private = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
        let public = RsaPublicKey::from(&private);
        let public_pem = rsa_public_pem(&public).unwrap();
        let private_pem = rsa::pkcs8::EncodePrivateKey::to_pkcs8_pem(&private, rsa::pkcs8::LineEnding::LF).unwrap();

        assert_eq!(parse_rsa_public_pem(&public_pem).unwrap(), public);
        assert_eq!(parse_rsa_private_pem(&private_pem).unwrap(), private);
        assert_eq!(public_key_family(&public_pem).unwrap(), KeyFamily::Rsa);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse_rsa_public_pem("not a pem").is_err());
        let wrong_label = pem::encode(&pem::Pem::new("SOMETHING ELSE", vec![1, 2, 3]));
        assert!(matches!(
            parse_ec_public_pem(&wrong_label),
            Err(KeyError::UnsupportedPem(_))
        ));
        assert!(public_key_family(&wrong_label).is_err());
    }
}
