//! Rewrap and upsert plugins
//!
//! Plugins run serially in registration order. A rewrap plugin may refine the
//! request policy or add response fields; the entity, claims, key access
//! object and context handed to the next plugin are always the originals.

use crate::app::RequestContext;
use crate::error::PluginError;
use crate::retry::{retry, RetryConfig, RetryableError};
use async_trait::async_trait;
use dashmap::DashMap;
use opentdf_authz::{
    AttributePolicyConfig, AttributePolicyError, AttributePolicyFetcher, AttributeRegistry, Claims, Entity, KasError,
    KeyAccessObject, Policy, RegistryError,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

impl RetryableError for PluginError {
    fn is_retryable(&self) -> bool {
        !matches!(self, PluginError::Failed { .. })
    }

    fn timed_out(_after: Duration) -> Self {
        PluginError::Timeout {
            plugin: "unknown".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RewrapRequest {
    pub policy: Policy,
    pub entity: Entity,
    pub claims: Claims,
    pub key_access: KeyAccessObject,
    pub context: RequestContext,
}

/// Response under construction; `fields` are merged into the final body
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RewrapResponse {
    pub metadata: Option<Value>,
    pub fields: Map<String, Value>,
}

impl RewrapResponse {
    pub fn new(metadata: Option<Value>) -> Self {
        Self {
            metadata,
            fields: Map::new(),
        }
    }

    /// A plugin already produced the final wrapped key
    pub fn entity_wrapped_key(&self) -> Option<&str> {
        self.fields.get("entityWrappedKey").and_then(Value::as_str)
    }

    /// A plugin supplied a replacement KAS-wrapped key
    pub fn kas_wrapped_key(&self) -> Option<&str> {
        self.fields.get("kasWrappedKey").and_then(Value::as_str)
    }
}

pub enum RewrapVerdict {
    Continue(RewrapRequest, RewrapResponse),
    /// Deny the request, optionally with a message for the caller
    Reject(Option<String>),
}

#[async_trait]
pub trait RewrapPlugin: Send + Sync {
    fn name(&self) -> &str;

    async fn update(&self, req: RewrapRequest, res: RewrapResponse) -> Result<RewrapVerdict, PluginError>;

    /// Rule configs for attribute names this plugin knows about
    async fn fetch_attributes(&self, _name_uris: &[String]) -> Result<Vec<AttributePolicyConfig>, PluginError> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone)]
pub struct UpsertRequest {
    pub policy: Policy,
    pub claims: Claims,
    pub key_access: KeyAccessObject,
    pub context: RequestContext,
}

pub enum UpsertVerdict {
    /// Empty string means success
    Status(String),
    Reject(Option<String>),
}

#[async_trait]
pub trait UpsertPlugin: Send + Sync {
    fn name(&self) -> &str;

    async fn upsert(&self, req: &UpsertRequest) -> Result<UpsertVerdict, PluginError>;
}

fn veto(plugin: &str, message: Option<String>) -> KasError {
    KasError::Forbidden(message.unwrap_or_else(|| format!("rejected by plugin {}", plugin)))
}

/// Ordered plugin pipeline
#[derive(Default)]
pub struct PluginRunner {
    rewrap: Vec<Arc<dyn RewrapPlugin>>,
    upsert: Vec<Arc<dyn UpsertPlugin>>,
    retry: RetryConfig,
}

impl PluginRunner {
    pub fn new(retry: RetryConfig) -> Self {
        Self {
            rewrap: Vec::new(),
            upsert: Vec::new(),
            retry,
        }
    }

    pub fn with_rewrap_plugin(mut self, plugin: Arc<dyn RewrapPlugin>) -> Self {
        info!(plugin = plugin.name(), "Registered rewrap plugin");
        self.rewrap.push(plugin);
        self
    }

    pub fn with_upsert_plugin(mut self, plugin: Arc<dyn UpsertPlugin>) -> Self {
        info!(plugin = plugin.name(), "Registered upsert plugin");
        self.upsert.push(plugin);
        self
    }

    pub fn rewrap_plugin_names(&self) -> Vec<&str> {
        self.rewrap.iter().map(|p| p.name()).collect()
    }

    pub fn upsert_plugin_names(&self) -> Vec<&str> {
        self.upsert.iter().map(|p| p.name()).collect()
    }

    /// Run every rewrap plugin; only the policy and response carry over between them
    pub async fn run_rewrap(
        &self,
        req: RewrapRequest,
        res: RewrapResponse,
    ) -> Result<(RewrapRequest, RewrapResponse), KasError> {
        let original = req;
        let mut policy = original.policy.clone();
        let mut res = res;

        for plugin in &self.rewrap {
            let name = plugin.name();
            let input = RewrapRequest {
                policy,
                ..original.clone()
            };
            let verdict = tokio::time::timeout(self.retry.timeout, plugin.update(input, res))
                .await
                .map_err(|_| PluginError::Timeout {
                    plugin: name.to_string(),
                })??;

            match verdict {
                RewrapVerdict::Reject(message) => {
                    warn!(plugin = name, "Rewrap rejected by plugin");
                    return Err(veto(name, message));
                }
                RewrapVerdict::Continue(returned, returned_res) => {
                    if returned.policy.uuid.trim().is_empty() {
                        return Err(PluginError::Failed {
                            plugin: name.to_string(),
                            reason: "returned a policy without a uuid".to_string(),
                        }
                        .into());
                    }
                    debug!(plugin = name, "Rewrap plugin completed");
                    policy = returned.policy;
                    res = returned_res;
                }
            }
        }

        Ok((RewrapRequest { policy, ..original }, res))
    }

    /// Ask each rewrap plugin for rule configs; outbound calls are retried
    pub async fn fetch_attributes(&self, name_uris: &[String]) -> Result<Vec<AttributePolicyConfig>, PluginError> {
        let mut configs = Vec::new();
        if name_uris.is_empty() {
            return Ok(configs);
        }
        for plugin in &self.rewrap {
            let found = retry(&self.retry, "plugin.fetch_attributes", || plugin.fetch_attributes(name_uris)).await?;
            debug!(plugin = plugin.name(), count = found.len(), "Fetched attribute configs");
            configs.extend(found);
        }
        Ok(configs)
    }

    /// Run every upsert plugin and collect their statuses
    pub async fn run_upsert(&self, req: &UpsertRequest) -> Result<Vec<String>, KasError> {
        let mut statuses = Vec::with_capacity(self.upsert.len());
        for plugin in &self.upsert {
            let name = plugin.name();
            let verdict = tokio::time::timeout(self.retry.timeout, plugin.upsert(req))
                .await
                .map_err(|_| PluginError::Timeout {
                    plugin: name.to_string(),
                })??;
            match verdict {
                UpsertVerdict::Status(status) => {
                    if !status.is_empty() {
                        info!(plugin = name, %status, "Upsert plugin reported a status");
                    }
                    statuses.push(status);
                }
                UpsertVerdict::Reject(message) => {
                    warn!(plugin = name, "Upsert rejected by plugin");
                    return Err(veto(name, message));
                }
            }
        }
        Ok(statuses)
    }
}

/// Cache miss source backed by the rewrap plugins
pub struct PluginAttributeFetcher {
    runner: Arc<PluginRunner>,
}

impl PluginAttributeFetcher {
    pub fn new(runner: Arc<PluginRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl AttributePolicyFetcher for PluginAttributeFetcher {
    async fn fetch(&self, name_uris: &[String]) -> Result<Vec<AttributePolicyConfig>, AttributePolicyError> {
        self.runner
            .fetch_attributes(name_uris)
            .await
            .map_err(|e| AttributePolicyError::Fetch(e.to_string()))
    }
}

/// Serves rule configs from the attribute registry; `update` passes through
pub struct RegistryAttributePlugin {
    registry: AttributeRegistry,
}

impl RegistryAttributePlugin {
    pub const NAME: &'static str = "registry-attributes";

    pub fn new(registry: AttributeRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl RewrapPlugin for RegistryAttributePlugin {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn update(&self, req: RewrapRequest, res: RewrapResponse) -> Result<RewrapVerdict, PluginError> {
        Ok(RewrapVerdict::Continue(req, res))
    }

    async fn fetch_attributes(&self, name_uris: &[String]) -> Result<Vec<AttributePolicyConfig>, PluginError> {
        self.registry.policy_configs(name_uris).await.map_err(|e| match e {
            RegistryError::Storage(reason) => PluginError::Unavailable {
                plugin: Self::NAME.to_string(),
                reason,
            },
            other => PluginError::Failed {
                plugin: Self::NAME.to_string(),
                reason: other.to_string(),
            },
        })
    }
}

/// Records upserted policies by uuid
#[derive(Default)]
pub struct PolicyLedgerUpsertPlugin {
    policies: DashMap<String, Policy>,
}

impl PolicyLedgerUpsertPlugin {
    pub const NAME: &'static str = "policy-ledger";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, uuid: &str) -> Option<Policy> {
        self.policies.get(uuid).map(|p| p.clone())
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

#[async_trait]
impl UpsertPlugin for PolicyLedgerUpsertPlugin {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn upsert(&self, req: &UpsertRequest) -> Result<UpsertVerdict, PluginError> {
        let uuid = req.policy.uuid.clone();
        if let Some(existing) = self.policies.get(&uuid) {
            if *existing != req.policy {
                return Ok(UpsertVerdict::Status(format!(
                    "policy {} is already recorded with a different body",
                    uuid
                )));
            }
            return Ok(UpsertVerdict::Status(String::new()));
        }
        self.policies.insert(uuid.clone(), req.policy.clone());
        info!(policy = %uuid, "Recorded policy");
        Ok(UpsertVerdict::Status(String::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentdf_authz::{AttributeName, AttributeSet, AttributeValue, KeyAccessUse, PolicyBuilder, Rule};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request() -> RewrapRequest {
        let kao = KeyAccessObject::parse(
            &serde_json::json!({"type": "remote", "url": "https://kas.example.com", "protocol": "kas"}),
            KeyAccessUse::Rewrap,
        )
        .unwrap();
        let claims = Claims {
            subject: "alice".into(),
            email: None,
            preferred_username: None,
            audience: vec!["kas".into()],
            client_public_signing_key: "pem".into(),
            entitlements: Vec::new(),
        };
        RewrapRequest {
            policy: PolicyBuilder::new().id("p-1").build(),
            entity: Entity::new("alice", AttributeSet::new()),
            claims,
            key_access: kao,
            context: RequestContext::default(),
        }
    }

    struct Tamper;

    #[async_trait]
    impl RewrapPlugin for Tamper {
        fn name(&self) -> &str {
            "tamper"
        }

        async fn update(&self, mut req: RewrapRequest, mut res: RewrapResponse) -> Result<RewrapVerdict, PluginError> {
            req.policy.body.dissem.push("bob".into());
            req.entity = Entity::new("mallory", AttributeSet::new());
            req.key_access.url = "https://evil.example.com".into();
            res.fields.insert("seen".into(), Value::from(true));
            Ok(RewrapVerdict::Continue(req, res))
        }
    }

    struct Observe {
        saw_original: AtomicUsize,
    }

    #[async_trait]
    impl RewrapPlugin for Observe {
        fn name(&self) -> &str {
            "observe"
        }

        async fn update(&self, req: RewrapRequest, res: RewrapResponse) -> Result<RewrapVerdict, PluginError> {
            if req.entity.user_id == "alice" && req.key_access.url == "https://kas.example.com" {
                self.saw_original.fetch_add(1, Ordering::SeqCst);
            }
            Ok(RewrapVerdict::Continue(req, res))
        }
    }

    struct Veto(Option<String>);

    #[async_trait]
    impl RewrapPlugin for Veto {
        fn name(&self) -> &str {
            "veto"
        }

        async fn update(&self, _req: RewrapRequest, _res: RewrapResponse) -> Result<RewrapVerdict, PluginError> {
            Ok(RewrapVerdict::Reject(self.0.clone()))
        }
    }

    struct Broken;

    #[async_trait]
    impl RewrapPlugin for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn update(&self, mut req: RewrapRequest, res: RewrapResponse) -> Result<RewrapVerdict, PluginError> {
            req.policy.uuid.clear();
            Ok(RewrapVerdict::Continue(req, res))
        }
    }

    #[tokio::test]
    async fn test_only_policy_carries_over() {
        let observe = Arc::new(Observe {
            saw_original: AtomicUsize::new(0),
        });
        let runner = PluginRunner::default()
            .with_rewrap_plugin(Arc::new(Tamper))
            .with_rewrap_plugin(observe.clone());

        let (req, res) = runner.run_rewrap(request(), RewrapResponse::default()).await.unwrap();
        assert_eq!(observe.saw_original.load(Ordering::SeqCst), 1);
        assert_eq!(req.policy.body.dissem, vec!["bob".to_string()]);
        assert_eq!(req.entity.user_id, "alice");
        assert_eq!(req.key_access.url, "https://kas.example.com");
        assert_eq!(res.fields.get("seen"), Some(&Value::from(true)));
    }

    #[tokio::test]
    async fn test_veto_is_forbidden() {
        let runner = PluginRunner::default().with_rewrap_plugin(Arc::new(Veto(Some("embargoed".into()))));
        let err = runner.run_rewrap(request(), RewrapResponse::default()).await.unwrap_err();
        assert_eq!(err, KasError::Forbidden("embargoed".into()));

        let runner = PluginRunner::default().with_rewrap_plugin(Arc::new(Veto(None)));
        let err = runner.run_rewrap(request(), RewrapResponse::default()).await.unwrap_err();
        assert_eq!(err.status(), 403);
    }

    #[tokio::test]
    async fn test_malformed_policy_is_plugin_failure() {
        let runner = PluginRunner::default().with_rewrap_plugin(Arc::new(Broken));
        let err = runner.run_rewrap(request(), RewrapResponse::default()).await.unwrap_err();
        assert!(matches!(err, KasError::PluginFailed(_)));
    }

    #[tokio::test]
    async fn test_registry_plugin_serves_active_names() {
        let registry = AttributeRegistry::default();
        registry
            .create_name(AttributeName::new("https://ex.com", "Rel", Rule::AnyOf, Vec::new()))
            .await
            .unwrap();
        registry
            .create_value(AttributeValue::new("https://ex.com/attr/Rel/value/USA").unwrap())
            .await
            .unwrap();

        let runner = Arc::new(PluginRunner::default().with_rewrap_plugin(Arc::new(RegistryAttributePlugin::new(registry))));
        let fetcher = PluginAttributeFetcher::new(runner);
        let configs = fetcher
            .fetch(&["https://ex.com/attr/Rel".to_string(), "https://ex.com/attr/Missing".to_string()])
            .await
            .unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].name, "Rel");
    }

    #[tokio::test]
    async fn test_policy_ledger_statuses() {
        let ledger = Arc::new(PolicyLedgerUpsertPlugin::new());
        let runner = PluginRunner::default().with_upsert_plugin(ledger.clone());
        let base = request();
        let upsert = UpsertRequest {
            policy: base.policy.clone(),
            claims: base.claims.clone(),
            key_access: base.key_access.clone(),
            context: base.context.clone(),
        };

        assert_eq!(runner.run_upsert(&upsert).await.unwrap(), vec![String::new()]);
        assert_eq!(runner.run_upsert(&upsert).await.unwrap(), vec![String::new()]);
        assert_eq!(ledger.len(), 1);

        let mut changed = upsert.clone();
        changed.policy.body.dissem.push("carol".into());
        let statuses = runner.run_upsert(&changed).await.unwrap();
        assert!(statuses[0].contains("p-1"));
    }
}
