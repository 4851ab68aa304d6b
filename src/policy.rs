use crate::attribute::{AttributeSet, AttributeValue};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("policy is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("policy is not valid UTF-8")]
    Utf8,

    #[error("policy JSON is invalid: {0}")]
    Json(#[from] serde_json::Error),

    #[error("policy uuid is empty")]
    MissingUuid,
}

impl PolicyError {
    /// Returns a stable error code for programmatic error handling
    pub fn error_code(&self) -> &'static str {
        match self {
            PolicyError::Encoding(_) => "KAS_E_POLICY_ENCODING",
            PolicyError::Utf8 => "KAS_E_POLICY_ENCODING",
            PolicyError::Json(_) => "KAS_E_POLICY_INVALID",
            PolicyError::MissingUuid => "KAS_E_POLICY_UUID",
        }
    }
}

/// Data policy: the attributes required for access and the dissemination list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub uuid: String,
    pub body: PolicyBody,
}

/// Policy body
///
/// Empty lists serialize as null, matching the SDK form that is HMAC-bound
/// to wrapped keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PolicyBody {
    #[serde(
        rename = "dataAttributes",
        default,
        serialize_with = "serialize_empty_vec_as_null",
        deserialize_with = "deserialize_null_as_empty_vec"
    )]
    pub data_attributes: Vec<AttributeValue>,
    #[serde(
        default,
        serialize_with = "serialize_empty_vec_as_null",
        deserialize_with = "deserialize_null_as_empty_vec"
    )]
    pub dissem: Vec<String>,
}

fn serialize_empty_vec_as_null<T, S>(vec: &Vec<T>, serializer: S) -> Result<S::Ok, S::Error>
where
    T: serde::Serialize,
    S: serde::Serializer,
{
    if vec.is_empty() {
        serializer.serialize_none()
    } else {
        vec.serialize(serializer)
    }
}

fn deserialize_null_as_empty_vec<'de, T, D>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    T: serde::Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    let opt = Option::<Vec<T>>::deserialize(deserializer)?;
    Ok(opt.unwrap_or_default())
}

impl Policy {
    pub fn new(uuid: String, data_attributes: Vec<AttributeValue>, dissem: Vec<String>) -> Self {
        Self {
            uuid,
            body: PolicyBody {
                data_attributes,
                dissem,
            },
        }
    }

    pub fn to_json(&self) -> Result<String, PolicyError> {
        serde_json::to_string(self).map_err(PolicyError::from)
    }

    pub fn from_json(json: &str) -> Result<Self, PolicyError> {
        let policy: Policy = serde_json::from_str(json)?;
        if policy.uuid.trim().is_empty() {
            return Err(PolicyError::MissingUuid);
        }
        Ok(policy)
    }

    /// Canonical wire form: base64 of the JSON serialization
    pub fn to_canonical(&self) -> Result<String, PolicyError> {
        Ok(BASE64.encode(self.to_json()?))
    }

    /// Data attributes grouped into clusters
    pub fn data_attribute_set(&self) -> AttributeSet {
        let mut set = AttributeSet::new();
        for value in &self.body.data_attributes {
            set.add(value.clone());
        }
        set
    }

    /// Attribute-name URIs referenced by the data attributes
    pub fn data_attribute_names(&self) -> Vec<String> {
        self.data_attribute_set().cluster_names()
    }

    /// An empty dissemination list admits every entity
    pub fn admits(&self, entity_id: &str) -> bool {
        self.body.dissem.is_empty() || self.body.dissem.iter().any(|d| d == entity_id)
    }
}

/// A policy together with the exact string it was received as
///
/// Binding checks must hash `raw`, never a re-serialization of `policy`.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalPolicy {
    raw: String,
    policy: Policy,
}

impl CanonicalPolicy {
    pub fn parse(raw: impl Into<String>) -> Result<Self, PolicyError> {
        let raw = raw.into();
        let decoded = BASE64.decode(raw.trim())?;
        let json = String::from_utf8(decoded).map_err(|_| PolicyError::Utf8)?;
        let policy = Policy::from_json(&json)?;
        Ok(Self { raw, policy })
    }

    /// Encode a policy into its canonical form
    pub fn from_policy(policy: Policy) -> Result<Self, PolicyError> {
        let raw = policy.to_canonical()?;
        Ok(Self { raw, policy })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Bytes covered by the policy binding
    pub fn binding_bytes(&self) -> &[u8] {
        self.raw.as_bytes()
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn into_policy(self) -> Policy {
        self.policy
    }
}

/// Builder for policies
#[derive(Debug, Default)]
pub struct PolicyBuilder {
    uuid: Option<String>,
    data_attributes: Vec<AttributeValue>,
    dissem: Vec<String>,
}

impl PolicyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn id(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    /// Add a data attribute by value URI
    pub fn attribute_uri(mut self, uri: impl AsRef<str>) -> Result<Self, crate::AttributeError> {
        self.data_attributes.push(AttributeValue::new(uri.as_ref())?);
        Ok(self)
    }

    #[must_use]
    pub fn attribute(mut self, value: AttributeValue) -> Self {
        self.data_attributes.push(value);
        self
    }

    #[must_use]
    pub fn dissem(mut self, target: impl Into<String>) -> Self {
        self.dissem.push(target.into());
        self
    }

    /// Build the policy, generating a v4 UUID when none was set
    pub fn build(self) -> Policy {
        let uuid = self.uuid.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        Policy::new(uuid, self.data_attributes, self.dissem)
    }
}
