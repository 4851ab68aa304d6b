//! Attribute registry
//!
//! Namespaces, attribute names and attribute values are never deleted, only
//! set INACTIVE. Creating a child creates any missing parents in the same
//! repository transaction.

use crate::attribute::{AttributeError, AttributeName, AttributeValue, Rule, State};
use crate::attribute_policy::{AttributePolicy, AttributePolicyConfig, AttributePolicyError};
use crate::fqn::AttributeFqn;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("invalid definition for {uri}: {reason}")]
    Invalid { uri: String, reason: String },

    #[error(transparent)]
    Attribute(#[from] AttributeError),

    #[error("attribute storage failed: {0}")]
    Storage(String),
}

impl From<AttributePolicyError> for RegistryError {
    fn from(err: AttributePolicyError) -> Self {
        match err {
            AttributePolicyError::InvalidConfig { name, reason } => RegistryError::Invalid { uri: name, reason },
            AttributePolicyError::Fetch(msg) => RegistryError::Storage(msg),
        }
    }
}

/// Persistence interface for the registry
///
/// Each method is one transaction. `create_name` and `create_value` insert
/// missing parents before the child.
#[async_trait]
pub trait AttributeRepository: Send + Sync {
    async fn namespaces(&self) -> Result<Vec<String>, RegistryError>;
    async fn create_namespace(&self, namespace: &str) -> Result<(), RegistryError>;
    async fn get_name(&self, name_uri: &str) -> Result<Option<AttributeName>, RegistryError>;
    async fn list_names(&self, namespace: &str) -> Result<Vec<AttributeName>, RegistryError>;
    async fn create_name(&self, name: AttributeName) -> Result<(), RegistryError>;
    async fn update_name(&self, name: AttributeName) -> Result<(), RegistryError>;
    async fn get_value(&self, uri: &str) -> Result<Option<AttributeValue>, RegistryError>;
    async fn list_values(&self, name_uri: &str) -> Result<Vec<AttributeValue>, RegistryError>;
    /// Insert a value; a missing name is created with the default rule
    async fn create_value(&self, value: AttributeValue) -> Result<(), RegistryError>;
    async fn update_value(&self, value: AttributeValue) -> Result<(), RegistryError>;
}

#[derive(Debug, Default)]
struct Tables {
    namespaces: BTreeSet<String>,
    names: BTreeMap<String, AttributeName>,
    values: BTreeMap<String, AttributeValue>,
}

impl Tables {
    fn ensure_namespace(&mut self, namespace: &str) {
        if self.namespaces.insert(namespace.to_string()) {
            debug!(namespace, "created namespace");
        }
    }

    fn ensure_name(&mut self, fqn: &AttributeFqn) {
        let name_uri = fqn.name_uri();
        if !self.names.contains_key(&name_uri) {
            self.ensure_namespace(fqn.namespace());
            debug!(name = %name_uri, "created attribute name");
            self.names.insert(
                name_uri,
                AttributeName::new(fqn.namespace(), fqn.name(), Rule::default(), Vec::new()),
            );
        }
    }
}

/// Registry tables held in memory behind one lock
#[derive(Debug, Default)]
pub struct InMemoryAttributeRepository {
    tables: RwLock<Tables>,
}

impl InMemoryAttributeRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AttributeRepository for InMemoryAttributeRepository {
    async fn namespaces(&self) -> Result<Vec<String>, RegistryError> {
        Ok(self.tables.read().await.namespaces.iter().cloned().collect())
    }

    async fn create_namespace(&self, namespace: &str) -> Result<(), RegistryError> {
        let mut tables = self.tables.write().await;
        if !tables.namespaces.insert(namespace.to_string()) {
            return Err(RegistryError::AlreadyExists(namespace.to_string()));
        }
        Ok(())
    }

    async fn get_name(&self, name_uri: &str) -> Result<Option<AttributeName>, RegistryError> {
        Ok(self.tables.read().await.names.get(name_uri).cloned())
    }

    async fn list_names(&self, namespace: &str) -> Result<Vec<AttributeName>, RegistryError> {
        Ok(self
            .tables
            .read()
            .await
            .names
            .values()
            .filter(|n| n.namespace() == namespace)
            .cloned()
            .collect())
    }

    async fn create_name(&self, name: AttributeName) -> Result<(), RegistryError> {
        let mut tables = self.tables.write().await;
        let uri = name.uri();
        if tables.names.contains_key(&uri) {
            return Err(RegistryError::AlreadyExists(uri));
        }
        tables.ensure_namespace(name.namespace());
        tables.names.insert(uri, name);
        Ok(())
    }

    async fn update_name(&self, name: AttributeName) -> Result<(), RegistryError> {
        let mut tables = self.tables.write().await;
        match tables.names.get_mut(&name.uri()) {
            Some(existing) => {
                *existing = name;
                Ok(())
            }
            None => Err(RegistryError::NotFound(name.uri())),
        }
    }

    async fn get_value(&self, uri: &str) -> Result<Option<AttributeValue>, RegistryError> {
        Ok(self.tables.read().await.values.get(uri).cloned())
    }

    async fn list_values(&self, name_uri: &str) -> Result<Vec<AttributeValue>, RegistryError> {
        Ok(self
            .tables
            .read()
            .await
            .values
            .values()
            .filter(|v| v.name_uri() == name_uri)
            .cloned()
            .collect())
    }

    async fn create_value(&self, value: AttributeValue) -> Result<(), RegistryError> {
        let mut tables = self.tables.write().await;
        let uri = value.uri();
        if tables.values.contains_key(&uri) {
            return Err(RegistryError::AlreadyExists(uri));
        }
        tables.ensure_name(value.fqn());
        tables.values.insert(uri, value);
        Ok(())
    }

    async fn update_value(&self, value: AttributeValue) -> Result<(), RegistryError> {
        let mut tables = self.tables.write().await;
        match tables.values.get_mut(&value.uri()) {
            Some(existing) => {
                *existing = value;
                Ok(())
            }
            None => Err(RegistryError::NotFound(value.uri())),
        }
    }
}

/// Attribute registry service
///
/// Validates definitions before they reach the repository: HIERARCHY names
/// need a non-empty, duplicate-free order, and every value of a HIERARCHY
/// name must appear in that order.
#[derive(Clone)]
pub struct AttributeRegistry {
    repo: Arc<dyn AttributeRepository>,
}

impl Default for AttributeRegistry {
    fn default() -> Self {
        Self::new(Arc::new(InMemoryAttributeRepository::new()))
    }
}

impl AttributeRegistry {
    pub fn new(repo: Arc<dyn AttributeRepository>) -> Self {
        Self { repo }
    }

    pub async fn namespaces(&self) -> Result<Vec<String>, RegistryError> {
        self.repo.namespaces().await
    }

    pub async fn create_namespace(&self, namespace: &str) -> Result<String, RegistryError> {
        let namespace = namespace.trim_end_matches('/').to_lowercase();
        if !namespace.contains("://") {
            return Err(RegistryError::Invalid {
                uri: namespace,
                reason: "namespace must be scheme://authority".to_string(),
            });
        }
        self.repo.create_namespace(&namespace).await?;
        info!(namespace = %namespace, "namespace registered");
        Ok(namespace)
    }

    /// Create an attribute name; for HIERARCHY every order entry becomes a value
    pub async fn create_name(&self, name: AttributeName) -> Result<AttributeName, RegistryError> {
        let checked = AttributePolicy::new(name.uri(), name.rule, name.order.clone())?;
        let mut name = name;
        name.order = checked.order().to_vec();

        self.repo.create_name(name.clone()).await?;
        for value in &name.order {
            self.ensure_value(AttributeValue::new(&name.value_uri(value))?).await?;
        }
        info!(name = %name.uri(), rule = %name.rule, "attribute name registered");
        Ok(name)
    }

    pub async fn get_name(&self, name_uri: &str) -> Result<AttributeName, RegistryError> {
        let fqn = AttributeFqn::parse_name(name_uri).map_err(AttributeError::from)?;
        self.repo
            .get_name(&fqn.name_uri())
            .await?
            .ok_or_else(|| RegistryError::NotFound(fqn.name_uri()))
    }

    pub async fn list_names(&self, namespace: &str) -> Result<Vec<AttributeName>, RegistryError> {
        self.repo.list_names(&namespace.trim_end_matches('/').to_lowercase()).await
    }

    /// Change rule, order or state; namespace and name are fixed
    pub async fn update_name(
        &self,
        name_uri: &str,
        rule: Rule,
        order: Vec<String>,
        state: State,
    ) -> Result<AttributeName, RegistryError> {
        let mut name = self.get_name(name_uri).await?;
        let checked = AttributePolicy::new(name.uri(), rule, order)?;

        if rule == Rule::Hierarchy {
            let declared = self.repo.list_values(&name.uri()).await?;
            if let Some(stray) = declared
                .iter()
                .filter(|v| v.state().is_active())
                .find(|v| checked.rank(v.value()).is_none())
            {
                return Err(RegistryError::Invalid {
                    uri: name.uri(),
                    reason: format!("order omits declared value '{}'", stray.value()),
                });
            }
        }

        name.rule = rule;
        name.order = checked.order().to_vec();
        name.state = state;
        self.repo.update_name(name.clone()).await?;
        for value in &name.order {
            self.ensure_value(AttributeValue::new(&name.value_uri(value))?).await?;
        }
        info!(name = %name.uri(), rule = %name.rule, state = ?name.state, "attribute name updated");
        Ok(name)
    }

    /// Create a value, creating its namespace and name when absent
    pub async fn create_value(&self, value: AttributeValue) -> Result<AttributeValue, RegistryError> {
        if let Some(name) = self.repo.get_name(&value.name_uri()).await? {
            if name.rule == Rule::Hierarchy && !name.order.iter().any(|v| v == value.value()) {
                return Err(RegistryError::Invalid {
                    uri: value.uri(),
                    reason: "value is not part of the hierarchy order".to_string(),
                });
            }
        }
        self.repo.create_value(value.clone()).await?;
        debug!(value = %value.uri(), "attribute value registered");
        Ok(value)
    }

    async fn ensure_value(&self, value: AttributeValue) -> Result<(), RegistryError> {
        match self.repo.create_value(value).await {
            Ok(()) | Err(RegistryError::AlreadyExists(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn get_value(&self, uri: &str) -> Result<AttributeValue, RegistryError> {
        let value = AttributeValue::new(uri)?;
        self.repo
            .get_value(&value.uri())
            .await?
            .ok_or_else(|| RegistryError::NotFound(value.uri()))
    }

    pub async fn list_values(&self, name_uri: &str) -> Result<Vec<AttributeValue>, RegistryError> {
        let name = self.get_name(name_uri).await?;
        self.repo.list_values(&name.uri()).await
    }

    pub async fn set_value_state(&self, uri: &str, state: State) -> Result<AttributeValue, RegistryError> {
        let value = self.get_value(uri).await?.with_state(state);
        self.repo.update_value(value.clone()).await?;
        info!(value = %value.uri(), state = ?state, "attribute value state changed");
        Ok(value)
    }

    /// True when the value is registered and both it and its name are ACTIVE
    pub async fn is_active_value(&self, uri: &str) -> Result<bool, RegistryError> {
        let value = match self.get_value(uri).await {
            Ok(value) => value,
            Err(RegistryError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        let name_active = self
            .repo
            .get_name(&value.name_uri())
            .await?
            .is_some_and(|n| n.state.is_active());
        Ok(name_active && value.state().is_active())
    }

    /// Rule configs for the requested names, skipping unknown and INACTIVE names
    pub async fn policy_configs(&self, name_uris: &[String]) -> Result<Vec<AttributePolicyConfig>, RegistryError> {
        let mut configs = Vec::new();
        for uri in name_uris {
            if let Some(name) = self.repo.get_name(uri).await? {
                if name.state.is_active() {
                    configs.push(AttributePolicyConfig::from(&name));
                }
            }
        }
        Ok(configs)
    }
}
