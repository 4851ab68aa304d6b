//! Key Access Object (KAO) parsing
//!
//! A KAO describes where an object key lives and how it is bound to the policy.
//! Missing required fields are reported separately from fields that are present
//! but carry a value the KAS cannot accept.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyAccessError {
    /// A required field is absent
    #[error("key access object is missing '{0}'")]
    MissingField(&'static str),

    /// A field is present but its value is unacceptable
    #[error("key access object field '{field}' is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("key access type '{0}' is not supported by this operation")]
    Unsupported(String),
}

impl KeyAccessError {
    /// True when the failure is a missing field rather than a bad value
    pub fn is_missing(&self) -> bool {
        matches!(self, KeyAccessError::MissingField(_))
    }

    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        KeyAccessError::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyAccessType {
    #[serde(rename = "remote")]
    Remote,
    #[serde(rename = "wrapped")]
    Wrapped,
    #[serde(rename = "remoteWrapped")]
    RemoteWrapped,
}

impl KeyAccessType {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyAccessType::Remote => "remote",
            KeyAccessType::Wrapped => "wrapped",
            KeyAccessType::RemoteWrapped => "remoteWrapped",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "remote" => Some(KeyAccessType::Remote),
            "wrapped" => Some(KeyAccessType::Wrapped),
            "remoteWrapped" => Some(KeyAccessType::RemoteWrapped),
            _ => None,
        }
    }
}

impl fmt::Display for KeyAccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation a KAO is parsed for; upsert also validates bindings on remote KAOs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAccessUse {
    Rewrap,
    Upsert,
}

pub const KAS_PROTOCOL: &str = "kas";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyAccessObject {
    #[serde(rename = "type")]
    pub access_type: KeyAccessType,
    pub url: String,
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrapped_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_binding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_metadata: Option<String>,
    /// Base64 NanoTDF header for the EC form
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
}

impl KeyAccessObject {
    /// Parse and validate a KAO from its JSON form
    pub fn parse(raw: &Value, usage: KeyAccessUse) -> Result<Self, KeyAccessError> {
        let map = raw
            .as_object()
            .ok_or_else(|| KeyAccessError::invalid("keyAccess", "expected a JSON object"))?;

        let type_str = required_str(map, "type")?;
        let access_type = KeyAccessType::parse(type_str)
            .ok_or_else(|| KeyAccessError::invalid("type", format!("unknown type '{}'", type_str)))?;

        let url = required_str(map, "url")?;
        if url.trim().is_empty() {
            return Err(KeyAccessError::invalid("url", "empty"));
        }

        let protocol = required_str(map, "protocol")?;
        if protocol != KAS_PROTOCOL {
            return Err(KeyAccessError::invalid(
                "protocol",
                format!("expected '{}', got '{}'", KAS_PROTOCOL, protocol),
            ));
        }

        let kao = Self {
            access_type,
            url: url.to_string(),
            protocol: protocol.to_string(),
            kid: optional_str(map, "kid")?,
            wrapped_key: optional_str(map, "wrappedKey")?,
            policy_binding: optional_str(map, "policyBinding")?,
            encrypted_metadata: optional_str(map, "encryptedMetadata")?,
            header: optional_str(map, "header")?,
        };

        if kao.requires_binding(usage) {
            if kao.wrapped_key.is_none() {
                return Err(KeyAccessError::MissingField("wrappedKey"));
            }
            if kao.policy_binding.is_none() {
                return Err(KeyAccessError::MissingField("policyBinding"));
            }
        }

        Ok(kao)
    }

    /// Whether a wrapped key and policy binding must be present and checked
    pub fn requires_binding(&self, usage: KeyAccessUse) -> bool {
        match (self.access_type, usage) {
            (KeyAccessType::Wrapped, _) => self.header.is_none(),
            (KeyAccessType::Remote, KeyAccessUse::Upsert) => self.wrapped_key.is_some(),
            _ => false,
        }
    }

    /// Decoded wrapped key bytes
    pub fn wrapped_key_bytes(&self) -> Result<Vec<u8>, KeyAccessError> {
        let encoded = self
            .wrapped_key
            .as_deref()
            .ok_or(KeyAccessError::MissingField("wrappedKey"))?;
        BASE64
            .decode(encoded)
            .map_err(|e| KeyAccessError::invalid("wrappedKey", e.to_string()))
    }

    /// Decoded policy binding bytes
    pub fn policy_binding_bytes(&self) -> Result<Vec<u8>, KeyAccessError> {
        let encoded = self
            .policy_binding
            .as_deref()
            .ok_or(KeyAccessError::MissingField("policyBinding"))?;
        BASE64
            .decode(encoded)
            .map_err(|e| KeyAccessError::invalid("policyBinding", e.to_string()))
    }

    /// Decoded NanoTDF header bytes
    pub fn header_bytes(&self) -> Result<Vec<u8>, KeyAccessError> {
        let encoded = self
            .header
            .as_deref()
            .ok_or(KeyAccessError::MissingField("header"))?;
        BASE64
            .decode(encoded)
            .map_err(|e| KeyAccessError::invalid("header", e.to_string()))
    }
}

fn required_str<'a>(map: &'a Map<String, Value>, field: &'static str) -> Result<&'a str, KeyAccessError> {
    match map.get(field) {
        None | Some(Value::Null) => Err(KeyAccessError::MissingField(field)),
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(KeyAccessError::invalid(field, "expected a string")),
    }
}

fn optional_str(map: &Map<String, Value>, field: &'static str) -> Result<Option<String>, KeyAccessError> {
    match map.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(KeyAccessError::invalid(field, "expected a string")),
    }
}
