//! OpenTDF Cryptographic Operations
//!
//! Primitives used by the key access service:
//! - RSA-OAEP-SHA1 key wrapping for `wrapped` key access objects
//! - AES-GCM for encrypted metadata and NanoTDF policies
//! - HMAC-SHA256 policy bindings with constant-time verification
//! - P-256 ECDH + HKDF and ECDSA bindings for NanoTDF
//!
//! # Security Features
//!
//! - **Zeroization**: recovered key material uses `zeroize` to clear memory on drop
//! - **Constant-time comparison**: binding verification uses `subtle::ConstantTimeEq`
//! - **Opaque failures**: unwrap and decrypt errors never carry operand material
//!
//! # Example
//!
//! ```
//! use opentdf_crypto::{calculate_policy_binding, verify_policy_binding};
//! use base64::Engine as _;
//!
//! let key = [7u8; 32];
//! let canonical = b"eyJ1dWlkIjoiMSJ9";
//! let binding = calculate_policy_binding(&key, canonical).unwrap();
//! let decoded = base64::engine::general_purpose::STANDARD.decode(binding).unwrap();
//! assert!(verify_policy_binding(&key, canonical, &decoded).is_ok());
//! ```

pub mod aead;
pub mod helpers;
pub mod hmac;
pub mod kem;
pub mod keys;
pub mod signature;
pub mod types;

pub use aead::{EncryptedMetadata, IV_LEN, TAG_LEN};
pub use helpers::{generate_key_32, generate_nonce, CryptoError};
pub use hmac::{calculate_hmac, calculate_policy_binding, verify_policy_binding, HmacError};
pub use kem::ec::{compressed_point, ecdh_x_coordinate, nanotdf_salt, EcdhKem};
pub use kem::rsa::{wrap_key_with_rsa_oaep, OaepHash, RsaOaepKem};
pub use kem::{KemError, KeyEncapsulation};
pub use keys::KeyFamily;
pub use signature::{sign_ecdsa_p256, verify_ecdsa_p256, verify_gmac_binding};
pub use types::{AesKey, KeyError, Nonce96, SymmetricKey};

pub use p256;
pub use rsa;
