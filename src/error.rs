//! Unified error type for the key access service
//!
//! Internal modules keep their domain-specific errors for precise handling.
//! `KasError` collapses them into the fixed set of kinds callers observe,
//! each with a stable HTTP status and error code.
//!
//! # Example
//!
//! ```
//! use opentdf_authz::{KasError, PolicyError};
//!
//! let err: KasError = PolicyError::MissingUuid.into();
//! assert_eq!(err.status(), 400);
//! assert_eq!(err.error_code(), "KAS_E_BAD_REQUEST");
//! ```

use crate::adjudicator::DenyReason;
use crate::attribute::AttributeError;
use crate::attribute_policy::AttributePolicyError;
use crate::entitlements::EntitlementError;
use crate::entity::ClaimsError;
use crate::key_access::KeyAccessError;
use crate::policy::PolicyError;
use crate::registry::RegistryError;
use std::fmt::Display;
use thiserror::Error;
use tracing::warn;

/// Detail returned for every authentication failure
pub const UNAUTHORIZED_DETAIL: &str = "unauthorized";

/// Error kinds surfaced by the key access service
///
/// Messages of the 5xx kinds are for server-side logs only; the HTTP edge
/// replaces them with a correlation id.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KasError {
    /// Missing or invalid bearer token, envelope signature or audience
    #[error("{0}")]
    Unauthorized(String),

    /// Adjudication denial or plugin veto; the message is a stable reason code
    #[error("{0}")]
    Forbidden(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    /// Policy binding or key access object failure
    #[error("key access error: {0}")]
    KeyAccess(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// A plugin returned a value of the wrong shape
    #[error("plugin failed: {0}")]
    PluginFailed(String),

    /// A downstream fetch exhausted its retries
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl KasError {
    /// Authentication failure; the cause is logged and never returned
    pub fn unauthorized(cause: impl Display) -> Self {
        warn!(%cause, "Authentication failed");
        Self::Unauthorized(UNAUTHORIZED_DETAIL.to_string())
    }

    /// HTTP status for this kind
    pub fn status(&self) -> u16 {
        match self {
            Self::Unauthorized(_) => 401,
            Self::Forbidden(_) => 403,
            Self::BadRequest(_) | Self::KeyAccess(_) => 400,
            Self::NotFound(_) => 404,
            Self::AlreadyExists(_) => 409,
            Self::Crypto(_) | Self::KeyNotFound(_) | Self::PluginFailed(_) => 500,
            Self::Unavailable(_) => 503,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "Unauthorized",
            Self::Forbidden(_) => "Forbidden",
            Self::BadRequest(_) => "Bad Request",
            Self::KeyAccess(_) => "Key Access Error",
            Self::NotFound(_) => "Not Found",
            Self::AlreadyExists(_) => "Conflict",
            Self::Crypto(_) | Self::KeyNotFound(_) | Self::PluginFailed(_) => "Internal Server Error",
            Self::Unavailable(_) => "Service Unavailable",
        }
    }

    /// Stable machine-readable code
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "KAS_E_UNAUTHORIZED",
            Self::Forbidden(_) => "KAS_E_FORBIDDEN",
            Self::BadRequest(_) => "KAS_E_BAD_REQUEST",
            Self::KeyAccess(_) => "KAS_E_KEY_ACCESS",
            Self::NotFound(_) => "KAS_E_NOT_FOUND",
            Self::AlreadyExists(_) => "KAS_E_ALREADY_EXISTS",
            Self::Crypto(_) => "KAS_E_CRYPTO",
            Self::KeyNotFound(_) => "KAS_E_KEY_NOT_FOUND",
            Self::PluginFailed(_) => "KAS_E_PLUGIN_FAILED",
            Self::Unavailable(_) => "KAS_E_UNAVAILABLE",
        }
    }

    /// Returns true if the error is potentially retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// Returns true if the detail must not be shown to callers
    pub fn is_internal(&self) -> bool {
        self.status() >= 500 && !self.is_retryable()
    }

    /// Message without the kind prefix
    pub fn detail(&self) -> &str {
        match self {
            Self::Unauthorized(m)
            | Self::Forbidden(m)
            | Self::BadRequest(m)
            | Self::KeyAccess(m)
            | Self::NotFound(m)
            | Self::AlreadyExists(m)
            | Self::Crypto(m)
            | Self::KeyNotFound(m)
            | Self::PluginFailed(m)
            | Self::Unavailable(m) => m,
        }
    }
}

impl From<PolicyError> for KasError {
    fn from(err: PolicyError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl From<KeyAccessError> for KasError {
    fn from(err: KeyAccessError) -> Self {
        if err.is_missing() {
            Self::BadRequest(err.to_string())
        } else {
            Self::KeyAccess(err.to_string())
        }
    }
}

impl From<AttributeError> for KasError {
    fn from(err: AttributeError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl From<ClaimsError> for KasError {
    fn from(err: ClaimsError) -> Self {
        Self::unauthorized(err)
    }
}

impl From<DenyReason> for KasError {
    fn from(reason: DenyReason) -> Self {
        Self::Forbidden(reason.to_string())
    }
}

impl From<RegistryError> for KasError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(what) => Self::NotFound(what),
            RegistryError::AlreadyExists(what) => Self::AlreadyExists(what),
            RegistryError::Invalid { .. } | RegistryError::Attribute(_) => Self::BadRequest(err.to_string()),
            RegistryError::Storage(_) => Self::Unavailable(err.to_string()),
        }
    }
}

impl From<EntitlementError> for KasError {
    fn from(err: EntitlementError) -> Self {
        match err {
            EntitlementError::InvalidUri(_) | EntitlementError::EmptyEntity => Self::BadRequest(err.to_string()),
            EntitlementError::UnknownAttribute(uri) => Self::NotFound(uri),
            EntitlementError::Registry(inner) => inner.into(),
            EntitlementError::Storage(_) => Self::Unavailable(err.to_string()),
        }
    }
}

impl From<AttributePolicyError> for KasError {
    fn from(err: AttributePolicyError) -> Self {
        match err {
            AttributePolicyError::InvalidConfig { .. } => Self::BadRequest(err.to_string()),
            AttributePolicyError::Fetch(_) => Self::Unavailable(err.to_string()),
        }
    }
}

impl From<opentdf_crypto::HmacError> for KasError {
    fn from(err: opentdf_crypto::HmacError) -> Self {
        match err {
            opentdf_crypto::HmacError::VerificationFailed => Self::KeyAccess("policy binding mismatch".to_string()),
            other => Self::Crypto(other.to_string()),
        }
    }
}

impl From<opentdf_crypto::CryptoError> for KasError {
    fn from(err: opentdf_crypto::CryptoError) -> Self {
        Self::Crypto(err.to_string())
    }
}

impl From<opentdf_crypto::KemError> for KasError {
    fn from(err: opentdf_crypto::KemError) -> Self {
        Self::Crypto(err.to_string())
    }
}

impl From<opentdf_crypto::KeyError> for KasError {
    fn from(err: opentdf_crypto::KeyError) -> Self {
        Self::Crypto(err.to_string())
    }
}
