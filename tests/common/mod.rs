//! Shared fixtures for the attribute, policy and entitlement integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use opentdf_authz::{
    AttributeName, AttributePolicyCache, AttributePolicyConfig, AttributePolicyError, AttributePolicyFetcher,
    AttributeRegistry, AttributeSet, Entity, Policy, PolicyBuilder, Rule,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const NS: &str = "https://ex.com";

/// `NS/attr/<suffix>`
pub fn uri(suffix: &str) -> String {
    format!("{}/attr/{}", NS, suffix)
}

pub fn entity(id: &str, attributes: &[&str]) -> Entity {
    Entity::new(id, AttributeSet::from_uris(attributes.iter().map(|a| uri(a))).unwrap())
}

pub fn policy(data_attributes: &[&str], dissem: &[&str]) -> Policy {
    let mut builder = PolicyBuilder::new();
    for attr in data_attributes {
        builder = builder.attribute_uri(uri(attr)).unwrap();
    }
    for target in dissem {
        builder = builder.dissem(*target);
    }
    builder.build()
}

/// Registry holding the attribute names the scenarios use
pub async fn registry() -> AttributeRegistry {
    let registry = AttributeRegistry::default();
    let names = [
        AttributeName::new(NS, "Classification", Rule::AllOf, Vec::new()),
        AttributeName::new(NS, "COI", Rule::AllOf, Vec::new()),
        AttributeName::new(NS, "Rel", Rule::AnyOf, Vec::new()),
        AttributeName::new(
            NS,
            "Class",
            Rule::Hierarchy,
            vec!["TS".into(), "S".into(), "C".into(), "U".into()],
        ),
    ];
    for name in names {
        registry.create_name(name).await.unwrap();
    }
    registry
}

/// Cache miss source reading rules from a registry
pub struct RegistryFetcher {
    pub registry: AttributeRegistry,
    pub calls: AtomicUsize,
}

#[async_trait]
impl AttributePolicyFetcher for RegistryFetcher {
    async fn fetch(&self, name_uris: &[String]) -> Result<Vec<AttributePolicyConfig>, AttributePolicyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.registry
            .policy_configs(name_uris)
            .await
            .map_err(|e| AttributePolicyError::Fetch(e.to_string()))
    }
}

/// Cache backed by the scenario registry
pub async fn cache() -> (AttributePolicyCache, Arc<RegistryFetcher>) {
    let fetcher = Arc::new(RegistryFetcher {
        registry: registry().await,
        calls: AtomicUsize::new(0),
    });
    (AttributePolicyCache::with_fetcher(fetcher.clone()), fetcher)
}
