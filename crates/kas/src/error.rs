//! KAS error types
//!
//! Each service keeps its own error enum; all of them convert into the
//! unified [`KasError`] at the service boundary.

use opentdf_authz::KasError;
use thiserror::Error;

/// Errors raised while loading or selecting KAS keys
#[derive(Debug, Error)]
pub enum KeyMasterError {
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// The named key exists but holds a different kind of material
    #[error("key {name} is not a {expected} key")]
    WrongKind { name: String, expected: &'static str },

    #[error("invalid key {name}: {reason}")]
    InvalidKey { name: String, reason: String },

    #[error("unsupported key algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("failed to read key file {path}: {reason}")]
    Io { path: String, reason: String },
}

/// Errors raised while parsing or opening a NanoTDF header
#[derive(Debug, Error)]
pub enum NanoTdfError {
    #[error("NanoTDF header truncated")]
    Truncated,

    #[error("invalid NanoTDF magic number")]
    InvalidMagic,

    #[error("unsupported NanoTDF feature: {0}")]
    Unsupported(String),

    #[error("invalid NanoTDF header: {0}")]
    InvalidHeader(String),

    #[error("NanoTDF policy binding verification failed")]
    BindingMismatch,

    #[error("NanoTDF policy decryption failed")]
    PolicyDecryption,

    #[error("NanoTDF key derivation failed")]
    KeyDerivation,
}

/// Errors raised while verifying bearer tokens and signed request envelopes
#[derive(Debug, Error)]
pub enum OidcError {
    #[error("missing or malformed authorization header")]
    MissingBearer,

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("token audience does not include {0}")]
    AudienceMismatch(String),

    #[error("token issuer realm {got} does not match {expected}")]
    RealmMismatch { expected: String, got: String },

    #[error("token has expired")]
    Expired,

    #[error("token signature is invalid")]
    InvalidSignature,

    #[error("no issuer key matches kid {0}")]
    UnknownKey(String),

    #[error("unsupported token algorithm {0}")]
    UnsupportedAlgorithm(String),

    #[error("issuer keys could not be fetched: {0}")]
    Fetch(String),
}

/// Errors raised by plugins and the plugin runner
#[derive(Debug, Error)]
pub enum PluginError {
    /// The plugin broke its contract
    #[error("plugin {plugin} failed: {reason}")]
    Failed { plugin: String, reason: String },

    /// The plugin's backend could not be reached
    #[error("plugin {plugin} unavailable: {reason}")]
    Unavailable { plugin: String, reason: String },

    #[error("plugin {plugin} timed out")]
    Timeout { plugin: String },
}

impl From<KeyMasterError> for KasError {
    fn from(err: KeyMasterError) -> Self {
        match err {
            KeyMasterError::KeyNotFound(_) | KeyMasterError::WrongKind { .. } => Self::KeyNotFound(err.to_string()),
            _ => Self::Crypto(err.to_string()),
        }
    }
}

impl From<NanoTdfError> for KasError {
    fn from(err: NanoTdfError) -> Self {
        match err {
            NanoTdfError::BindingMismatch => Self::KeyAccess(err.to_string()),
            NanoTdfError::KeyDerivation => Self::Crypto(err.to_string()),
            _ => Self::BadRequest(err.to_string()),
        }
    }
}

impl From<OidcError> for KasError {
    fn from(err: OidcError) -> Self {
        match err {
            OidcError::Fetch(_) => Self::Unavailable(err.to_string()),
            _ => Self::unauthorized(err),
        }
    }
}

impl From<PluginError> for KasError {
    fn from(err: PluginError) -> Self {
        match err {
            PluginError::Failed { .. } => Self::PluginFailed(err.to_string()),
            PluginError::Unavailable { .. } | PluginError::Timeout { .. } => Self::Unavailable(err.to_string()),
        }
    }
}
