//! Attribute model
//!
//! An [`AttributeValue`] is addressed by its value URI. Values sharing one
//! attribute-name URI form an [`AttributeCluster`], and an [`AttributeSet`]
//! maps name URIs to clusters. The adjudicator always compares clusters.

use crate::fqn::{AttributeFqn, FqnError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AttributeError {
    #[error("invalid attribute URI: {0}")]
    InvalidUri(#[from] FqnError),

    #[error("value {value} does not belong to cluster {cluster}")]
    WrongCluster { value: String, cluster: String },
}

/// Combining rule of an attribute name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Rule {
    #[default]
    AllOf,
    AnyOf,
    Hierarchy,
}

impl Rule {
    pub fn as_str(self) -> &'static str {
        match self {
            Rule::AllOf => "ALL_OF",
            Rule::AnyOf => "ANY_OF",
            Rule::Hierarchy => "HIERARCHY",
        }
    }

    /// Lenient parse used for stored and plugin-supplied configs
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "allof" => Some(Rule::AllOf),
            "anyof" => Some(Rule::AnyOf),
            "hierarchy" => Some(Rule::Hierarchy),
            _ => None,
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state shared by attribute values, names and entitlements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum State {
    #[default]
    Active,
    Inactive,
}

impl State {
    pub fn is_active(self) -> bool {
        self == State::Active
    }
}

/// A single attribute value
///
/// Equality and hashing use the URI only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeValue {
    #[serde(rename = "attribute", with = "fqn_string")]
    fqn: AttributeFqn,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kas_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub_key: Option<String>,
    #[serde(default)]
    is_default: bool,
    #[serde(default, skip_serializing)]
    state: State,
}

impl AttributeValue {
    /// Parse a value from its URI
    pub fn new(uri: &str) -> Result<Self, AttributeError> {
        Ok(Self::from_fqn(AttributeFqn::parse_value(uri)?))
    }

    pub fn from_fqn(fqn: AttributeFqn) -> Self {
        Self {
            fqn,
            display_name: None,
            kas_url: None,
            pub_key: None,
            is_default: false,
            state: State::Active,
        }
    }

    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_kas(mut self, kas_url: Option<String>, pub_key: Option<String>) -> Self {
        self.kas_url = kas_url;
        self.pub_key = pub_key;
        self
    }

    #[must_use]
    pub fn with_default(mut self, is_default: bool) -> Self {
        self.is_default = is_default;
        self
    }

    #[must_use]
    pub fn with_state(mut self, state: State) -> Self {
        self.state = state;
        self
    }

    pub fn uri(&self) -> String {
        self.fqn.uri()
    }

    pub fn fqn(&self) -> &AttributeFqn {
        &self.fqn
    }

    /// URI of the owning attribute name (the cluster key)
    pub fn name_uri(&self) -> String {
        self.fqn.name_uri()
    }

    /// The value component alone
    pub fn value(&self) -> &str {
        self.fqn.value().unwrap_or_default()
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn kas_url(&self) -> Option<&str> {
        self.kas_url.as_deref()
    }

    pub fn pub_key(&self) -> Option<&str> {
        self.pub_key.as_deref()
    }

    pub fn is_default(&self) -> bool {
        self.is_default
    }

    pub fn state(&self) -> State {
        self.state
    }
}

impl PartialEq for AttributeValue {
    fn eq(&self, other: &Self) -> bool {
        self.fqn == other.fqn
    }
}

impl Eq for AttributeValue {}

impl Hash for AttributeValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.fqn.hash(state);
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.fqn, f)
    }
}

mod fqn_string {
    use crate::fqn::AttributeFqn;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(fqn: &AttributeFqn, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&fqn.uri())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<AttributeFqn, D::Error> {
        let raw = String::deserialize(deserializer)?;
        AttributeFqn::parse_value(&raw).map_err(serde::de::Error::custom)
    }
}

/// Attribute name metadata: rule, hierarchy order and state
///
/// Namespace and name are fixed at construction; rule, order and state may change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeName {
    fqn: AttributeFqn,
    pub rule: Rule,
    /// Value components, highest privilege first. Only meaningful for HIERARCHY.
    pub order: Vec<String>,
    pub state: State,
}

impl AttributeName {
    pub fn new(namespace: &str, name: &str, rule: Rule, order: Vec<String>) -> Self {
        Self {
            fqn: AttributeFqn::attribute(namespace, name),
            rule,
            order,
            state: State::Active,
        }
    }

    pub fn parse(uri: &str, rule: Rule, order: Vec<String>) -> Result<Self, AttributeError> {
        Ok(Self {
            fqn: AttributeFqn::parse_name(uri)?,
            rule,
            order,
            state: State::Active,
        })
    }

    pub fn uri(&self) -> String {
        self.fqn.name_uri()
    }

    pub fn namespace(&self) -> &str {
        self.fqn.namespace()
    }

    pub fn name(&self) -> &str {
        self.fqn.name()
    }

    /// Value URI for one member of this name
    pub fn value_uri(&self, value: &str) -> String {
        AttributeFqn::with_value(self.fqn.namespace(), self.fqn.name(), value).uri()
    }
}

/// All values sharing one attribute-name URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeCluster {
    name_uri: String,
    values: BTreeMap<String, AttributeValue>,
}

impl AttributeCluster {
    pub fn new(name_uri: impl Into<String>) -> Self {
        Self {
            name_uri: name_uri.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn name_uri(&self) -> &str {
        &self.name_uri
    }

    /// Add a value; it must share this cluster's name URI
    pub fn add(&mut self, value: AttributeValue) -> Result<(), AttributeError> {
        if value.name_uri() != self.name_uri {
            return Err(AttributeError::WrongCluster {
                value: value.uri(),
                cluster: self.name_uri.clone(),
            });
        }
        self.values.insert(value.uri(), value);
        Ok(())
    }

    pub fn get(&self, uri: &str) -> Option<&AttributeValue> {
        self.values.get(uri)
    }

    pub fn remove(&mut self, uri: &str) -> Option<AttributeValue> {
        self.values.remove(uri)
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.values.contains_key(uri)
    }

    /// Snapshot of the value URIs
    pub fn uris(&self) -> BTreeSet<String> {
        self.values.keys().cloned().collect()
    }

    /// Snapshot of the values
    pub fn values(&self) -> Vec<AttributeValue> {
        self.values.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Attribute-name URI → cluster
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeSet {
    clusters: BTreeMap<String, AttributeCluster>,
}

impl AttributeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from value URIs
    pub fn from_uris<I, S>(uris: I) -> Result<Self, AttributeError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for uri in uris {
            set.add(AttributeValue::new(uri.as_ref())?);
        }
        Ok(set)
    }

    /// Add a value, creating its cluster when absent
    pub fn add(&mut self, value: AttributeValue) {
        let name_uri = value.name_uri();
        let cluster = self
            .clusters
            .entry(name_uri.clone())
            .or_insert_with(|| AttributeCluster::new(name_uri));
        cluster.values.insert(value.uri(), value);
    }

    /// Merge another set into this one
    pub fn extend(&mut self, other: AttributeSet) {
        for cluster in other.clusters.into_values() {
            for value in cluster.values.into_values() {
                self.add(value);
            }
        }
    }

    pub fn cluster(&self, name_uri: &str) -> Option<&AttributeCluster> {
        self.clusters.get(name_uri)
    }

    /// Name URIs present in the set
    pub fn cluster_names(&self) -> Vec<String> {
        self.clusters.keys().cloned().collect()
    }

    pub fn clusters(&self) -> impl Iterator<Item = &AttributeCluster> {
        self.clusters.values()
    }

    pub fn contains(&self, uri: &str) -> bool {
        match AttributeFqn::parse_value(uri) {
            Ok(fqn) => self
                .clusters
                .get(&fqn.name_uri())
                .is_some_and(|c| c.contains(&fqn.uri())),
            Err(_) => false,
        }
    }

    pub fn remove(&mut self, uri: &str) -> Option<AttributeValue> {
        let fqn = AttributeFqn::parse_value(uri).ok()?;
        let name_uri = fqn.name_uri();
        let cluster = self.clusters.get_mut(&name_uri)?;
        let removed = cluster.remove(&fqn.uri());
        if cluster.is_empty() {
            self.clusters.remove(&name_uri);
        }
        removed
    }

    pub fn values(&self) -> Vec<AttributeValue> {
        self.clusters
            .values()
            .flat_map(|c| c.values.values().cloned())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Total number of values across clusters
    pub fn len(&self) -> usize {
        self.clusters.values().map(AttributeCluster::len).sum()
    }
}
