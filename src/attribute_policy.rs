//! Attribute policy cache
//!
//! Maps attribute-name URIs to their combining rule and hierarchy order.
//! Entries are loaded from configs or fetched lazily on a miss; at most one
//! fetch per name URI is in flight and concurrent readers wait for it.

use crate::attribute::{AttributeName, Rule};
use crate::fqn::AttributeFqn;
use crate::single_flight::KeyedLocks;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Fetch attempts made on a cache miss before giving up
pub const DEFAULT_FETCH_ATTEMPTS: usize = 2;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AttributePolicyError {
    #[error("attribute policy for {name} is invalid: {reason}")]
    InvalidConfig { name: String, reason: String },

    #[error("attribute policy fetch failed: {0}")]
    Fetch(String),
}

/// Attribute definition as delivered by plugins and stores
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributePolicyConfig {
    pub authority_namespace: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<Vec<String>>,
}

impl AttributePolicyConfig {
    pub fn new(authority_namespace: &str, name: &str, rule: Rule, order: Vec<String>) -> Self {
        Self {
            authority_namespace: authority_namespace.to_string(),
            name: name.to_string(),
            rule: Some(rule.as_str().to_string()),
            order: if order.is_empty() { None } else { Some(order) },
        }
    }

    pub fn name_uri(&self) -> String {
        AttributeFqn::attribute(&self.authority_namespace, &self.name).name_uri()
    }
}

impl From<&AttributeName> for AttributePolicyConfig {
    fn from(name: &AttributeName) -> Self {
        Self::new(name.namespace(), name.name(), name.rule, name.order.clone())
    }
}

/// Rule and order for one attribute name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributePolicy {
    name_uri: String,
    rule: Rule,
    order: Vec<String>,
}

impl AttributePolicy {
    pub fn new(name_uri: impl Into<String>, rule: Rule, order: Vec<String>) -> Result<Self, AttributePolicyError> {
        let name_uri = name_uri.into();
        let order: Vec<String> = order.iter().map(|v| value_component(v)).collect();

        if rule == Rule::Hierarchy {
            if order.is_empty() {
                return Err(AttributePolicyError::InvalidConfig {
                    name: name_uri,
                    reason: "HIERARCHY requires a non-empty order".to_string(),
                });
            }
            let mut seen = HashSet::new();
            if let Some(dup) = order.iter().find(|v| !seen.insert(v.as_str())) {
                return Err(AttributePolicyError::InvalidConfig {
                    name: name_uri,
                    reason: format!("duplicate value '{}' in order", dup),
                });
            }
        }

        Ok(Self {
            name_uri,
            rule,
            order,
        })
    }

    /// Build from a config; a missing rule means ALL_OF
    pub fn from_config(config: &AttributePolicyConfig) -> Result<Self, AttributePolicyError> {
        let name_uri = config.name_uri();
        let rule = match &config.rule {
            None => Rule::AllOf,
            Some(raw) => Rule::parse(raw).ok_or_else(|| AttributePolicyError::InvalidConfig {
                name: name_uri.clone(),
                reason: format!("unknown rule '{}'", raw),
            })?,
        };
        Self::new(name_uri, rule, config.order.clone().unwrap_or_default())
    }

    pub fn name_uri(&self) -> &str {
        &self.name_uri
    }

    pub fn rule(&self) -> Rule {
        self.rule
    }

    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Position of a value in the hierarchy; 0 is the most privileged
    pub fn rank(&self, value: &str) -> Option<usize> {
        self.order.iter().position(|v| v == value)
    }
}

/// Orders may list bare values or full value URIs
fn value_component(entry: &str) -> String {
    match AttributeFqn::parse_value(entry) {
        Ok(fqn) => fqn.value().unwrap_or_default().to_string(),
        Err(_) => entry.to_string(),
    }
}

/// Source consulted on a cache miss
#[async_trait]
pub trait AttributePolicyFetcher: Send + Sync {
    async fn fetch(&self, name_uris: &[String]) -> Result<Vec<AttributePolicyConfig>, AttributePolicyError>;
}

struct CacheEntry {
    policy: Arc<AttributePolicy>,
    loaded_at: Instant,
}

pub struct AttributePolicyCache {
    entries: DashMap<String, CacheEntry>,
    inflight: KeyedLocks,
    fetcher: Option<Arc<dyn AttributePolicyFetcher>>,
    attempts: usize,
    ttl: Option<Duration>,
}

impl Default for AttributePolicyCache {
    fn default() -> Self {
        Self::new()
    }
}

impl AttributePolicyCache {
    /// Cache without a miss fetcher; only loaded configs are served
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            inflight: KeyedLocks::new(),
            fetcher: None,
            attempts: DEFAULT_FETCH_ATTEMPTS,
            ttl: None,
        }
    }

    pub fn with_fetcher(fetcher: Arc<dyn AttributePolicyFetcher>) -> Self {
        Self {
            fetcher: Some(fetcher),
            ..Self::new()
        }
    }

    /// Expire entries after `ttl` so registry changes are picked up
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    #[must_use]
    pub fn with_attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    /// Load configs, replacing existing entries. Returns the number loaded.
    pub fn load_config(&self, configs: &[AttributePolicyConfig]) -> Result<usize, AttributePolicyError> {
        let policies = configs
            .iter()
            .map(AttributePolicy::from_config)
            .collect::<Result<Vec<_>, _>>()?;
        let count = policies.len();
        for policy in policies {
            self.insert(policy);
        }
        Ok(count)
    }

    pub fn insert(&self, policy: AttributePolicy) {
        debug!(name = %policy.name_uri, rule = %policy.rule, "Caching attribute policy");
        self.entries.insert(
            policy.name_uri.clone(),
            CacheEntry {
                policy: Arc::new(policy),
                loaded_at: Instant::now(),
            },
        );
    }

    /// Cached entry without triggering a fetch
    pub fn peek(&self, name_uri: &str) -> Option<Arc<AttributePolicy>> {
        let entry = self.entries.get(name_uri)?;
        if let Some(ttl) = self.ttl {
            if entry.loaded_at.elapsed() > ttl {
                return None;
            }
        }
        Some(entry.policy.clone())
    }

    /// Policy for a name URI, fetching on a miss
    ///
    /// Returns `None` when no fetcher is configured or every attempt failed.
    /// Failures are not remembered; a later call fetches again.
    pub async fn get(&self, name_uri: &str) -> Option<Arc<AttributePolicy>> {
        if let Some(policy) = self.peek(name_uri) {
            return Some(policy);
        }
        let fetcher = self.fetcher.clone()?;

        let _guard = self.inflight.lock(name_uri).await;

        // Another caller may have completed the fetch while we waited
        if let Some(policy) = self.peek(name_uri) {
            return Some(policy);
        }

        let names = [name_uri.to_string()];
        for attempt in 1..=self.attempts {
            match fetcher.fetch(&names).await {
                Ok(configs) => {
                    let wanted: Vec<_> = configs
                        .into_iter()
                        .filter(|c| c.name_uri() == name_uri)
                        .collect();
                    if let Err(e) = self.load_config(&wanted) {
                        warn!(name = name_uri, attempt, error = %e, "Rejected fetched attribute policy");
                    } else if let Some(policy) = self.peek(name_uri) {
                        return Some(policy);
                    } else {
                        debug!(name = name_uri, attempt, "Attribute policy not found by fetcher");
                    }
                }
                Err(e) => {
                    warn!(name = name_uri, attempt, error = %e, "Attribute policy fetch failed");
                }
            }
        }
        None
    }

    /// Make sure every name is cached, fetching the missing ones
    pub async fn ensure(&self, name_uris: &[String]) -> Vec<String> {
        let mut missing = Vec::new();
        for name in name_uris {
            if self.get(name).await.is_none() {
                missing.push(name.clone());
            }
        }
        missing
    }

    pub fn invalidate(&self, name_uri: &str) {
        self.entries.remove(name_uri);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
