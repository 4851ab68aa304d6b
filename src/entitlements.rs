//! Entity-attribute relationships (entitlements)
//!
//! Rows are unique on (entity, namespace, name, value). Removal flips a row
//! to INACTIVE; adding it again reactivates the same row.

use crate::attribute::State;
use crate::fqn::{AttributeFqn, FqnError};
use crate::registry::{AttributeRegistry, RegistryError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EntitlementError {
    #[error("invalid attribute URI: {0}")]
    InvalidUri(#[from] FqnError),

    #[error("entity identifier is empty")]
    EmptyEntity,

    #[error("attribute {0} is not registered or not active")]
    UnknownAttribute(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("entitlement storage failed: {0}")]
    Storage(String),
}

/// Persisted entitlement row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementRow {
    pub id: u64,
    pub entity_id: String,
    pub namespace: String,
    pub name: String,
    pub value: String,
    pub state: State,
}

impl EntitlementRow {
    pub fn attribute_uri(&self) -> String {
        AttributeFqn::with_value(&self.namespace, &self.name, &self.value).uri()
    }
}

#[async_trait]
pub trait EntitlementRepository: Send + Sync {
    /// Insert as ACTIVE or reactivate the existing row
    async fn upsert_active(&self, entity_id: &str, fqn: &AttributeFqn) -> Result<EntitlementRow, EntitlementError>;

    /// Set the state of an existing row; absent rows are left absent
    async fn set_state(
        &self,
        entity_id: &str,
        fqn: &AttributeFqn,
        state: State,
    ) -> Result<Option<EntitlementRow>, EntitlementError>;

    async fn rows(&self, entity_id: Option<&str>) -> Result<Vec<EntitlementRow>, EntitlementError>;
}

type RowKey = (String, String, String, String);

fn row_key(entity_id: &str, fqn: &AttributeFqn) -> RowKey {
    (
        entity_id.to_string(),
        fqn.namespace().to_string(),
        fqn.name().to_string(),
        fqn.value().unwrap_or_default().to_string(),
    )
}

#[derive(Debug, Default)]
struct Rows {
    next_id: u64,
    by_key: BTreeMap<RowKey, EntitlementRow>,
}

#[derive(Debug, Default)]
pub struct InMemoryEntitlementRepository {
    rows: RwLock<Rows>,
}

impl InMemoryEntitlementRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EntitlementRepository for InMemoryEntitlementRepository {
    async fn upsert_active(&self, entity_id: &str, fqn: &AttributeFqn) -> Result<EntitlementRow, EntitlementError> {
        let mut rows = self.rows.write().await;
        let key = row_key(entity_id, fqn);
        if let Some(row) = rows.by_key.get_mut(&key) {
            row.state = State::Active;
            return Ok(row.clone());
        }
        rows.next_id += 1;
        let row = EntitlementRow {
            id: rows.next_id,
            entity_id: key.0.clone(),
            namespace: key.1.clone(),
            name: key.2.clone(),
            value: key.3.clone(),
            state: State::Active,
        };
        rows.by_key.insert(key, row.clone());
        Ok(row)
    }

    async fn set_state(
        &self,
        entity_id: &str,
        fqn: &AttributeFqn,
        state: State,
    ) -> Result<Option<EntitlementRow>, EntitlementError> {
        let mut rows = self.rows.write().await;
        Ok(rows.by_key.get_mut(&row_key(entity_id, fqn)).map(|row| {
            row.state = state;
            row.clone()
        }))
    }

    async fn rows(&self, entity_id: Option<&str>) -> Result<Vec<EntitlementRow>, EntitlementError> {
        let rows = self.rows.read().await;
        Ok(rows
            .by_key
            .values()
            .filter(|row| entity_id.map_or(true, |id| row.entity_id == id))
            .cloned()
            .collect())
    }
}

/// Active entitlements of one entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityEntitlementList {
    pub entity_id: String,
    pub attributes: Vec<String>,
}

/// Listing of active entitlements, ordered by entity id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntitlementListing {
    pub entities: Vec<EntityEntitlementList>,
    /// Number of ACTIVE rows
    pub total: usize,
}

impl EntitlementListing {
    /// Wire form: a list of single-entry `{entityId: [uri, ...]}` maps
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Array(
            self.entities
                .iter()
                .map(|e| {
                    let mut entry = serde_json::Map::new();
                    entry.insert(e.entity_id.clone(), serde_json::json!(e.attributes));
                    serde_json::Value::Object(entry)
                })
                .collect(),
        )
    }
}

#[derive(Clone)]
pub struct EntitlementStore {
    repo: Arc<dyn EntitlementRepository>,
    registry: Option<AttributeRegistry>,
}

impl Default for EntitlementStore {
    fn default() -> Self {
        Self::new(Arc::new(InMemoryEntitlementRepository::new()))
    }
}

impl EntitlementStore {
    pub fn new(repo: Arc<dyn EntitlementRepository>) -> Self {
        Self { repo, registry: None }
    }

    /// Only grant attributes that are registered and ACTIVE
    #[must_use]
    pub fn with_registry(mut self, registry: AttributeRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    fn parse(entity_id: &str, uris: &[String]) -> Result<Vec<AttributeFqn>, EntitlementError> {
        if entity_id.trim().is_empty() {
            return Err(EntitlementError::EmptyEntity);
        }
        uris.iter()
            .map(|uri| AttributeFqn::parse_value(uri).map_err(EntitlementError::from))
            .collect()
    }

    /// Grant attributes; each row ends up ACTIVE
    pub async fn add(&self, entity_id: &str, uris: &[String]) -> Result<Vec<EntitlementRow>, EntitlementError> {
        let fqns = Self::parse(entity_id, uris)?;
        if let Some(registry) = &self.registry {
            for fqn in &fqns {
                if !registry.is_active_value(&fqn.uri()).await? {
                    return Err(EntitlementError::UnknownAttribute(fqn.uri()));
                }
            }
        }

        let mut rows = Vec::with_capacity(fqns.len());
        for fqn in &fqns {
            rows.push(self.repo.upsert_active(entity_id, fqn).await?);
        }
        info!(entity = entity_id, count = rows.len(), "entitlements granted");
        Ok(rows)
    }

    /// Soft-delete attributes; repeating a removal changes nothing
    pub async fn remove(&self, entity_id: &str, uris: &[String]) -> Result<usize, EntitlementError> {
        let fqns = Self::parse(entity_id, uris)?;
        let mut changed = 0;
        for fqn in &fqns {
            if self.repo.set_state(entity_id, fqn, State::Inactive).await?.is_some() {
                changed += 1;
            } else {
                debug!(entity = entity_id, attribute = %fqn, "no entitlement to remove");
            }
        }
        info!(entity = entity_id, count = changed, "entitlements revoked");
        Ok(changed)
    }

    /// Active entitlements grouped by entity, URIs sorted and deduplicated
    pub async fn list(&self) -> Result<EntitlementListing, EntitlementError> {
        let rows = self.repo.rows(None).await?;
        let mut grouped: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut total = 0;
        for row in rows.iter().filter(|r| r.state.is_active()) {
            total += 1;
            grouped
                .entry(row.entity_id.clone())
                .or_default()
                .insert(row.attribute_uri());
        }
        Ok(EntitlementListing {
            entities: grouped
                .into_iter()
                .map(|(entity_id, attributes)| EntityEntitlementList {
                    entity_id,
                    attributes: attributes.into_iter().collect(),
                })
                .collect(),
            total,
        })
    }

    /// Active attribute URIs of one entity
    pub async fn entitlements_for(&self, entity_id: &str) -> Result<Vec<String>, EntitlementError> {
        let rows = self.repo.rows(Some(entity_id)).await?;
        let uris: BTreeSet<String> = rows
            .iter()
            .filter(|r| r.state.is_active())
            .map(EntitlementRow::attribute_uri)
            .collect();
        Ok(uris.into_iter().collect())
    }

    /// Every row of one entity, including INACTIVE ones
    pub async fn rows_for(&self, entity_id: &str) -> Result<Vec<EntitlementRow>, EntitlementError> {
        self.repo.rows(Some(entity_id)).await
    }
}
