//! Shared service state
//!
//! `Application` owns everything that outlives a request: keys, the
//! attribute policy cache, the plugin pipeline, the token verifier and the
//! stores. Request handling itself is stateless.

use crate::error::OidcError;
use crate::key_master::KeyMaster;
use crate::oidc::{bearer_token, AccessToken, OidcVerifier};
use crate::plugins::{
    PluginAttributeFetcher, PluginRunner, PolicyLedgerUpsertPlugin, RegistryAttributePlugin, RewrapPlugin, UpsertPlugin,
};
use crate::retry::RetryConfig;
use opentdf_authz::{
    AttributePolicyCache, AttributeRegistry, EntitlementListing, EntitlementRow, EntitlementStore, KasError,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

pub const DEFAULT_ENTITLEMENT_AUDIENCE: &str = "tdf-entitlement";

/// Per-request inputs that do not come from the body
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Raw `Authorization` header value
    pub authorization: Option<String>,
    pub request_id: Option<String>,
}

impl RequestContext {
    pub fn with_bearer(token: &str) -> Self {
        Self {
            authorization: Some(format!("Bearer {}", token)),
            request_id: None,
        }
    }

    pub fn bearer(&self) -> Result<&str, OidcError> {
        bearer_token(self.authorization.as_deref())
    }
}

/// Body of `/v2/rewrap` and `/v2/upsert`
#[derive(Debug, Clone, Deserialize)]
pub struct SignedRequestEnvelope {
    #[serde(rename = "signedRequestToken")]
    pub signed_request_token: String,
}

#[derive(Debug, Clone)]
pub struct KasSettings {
    /// Audience required on rewrap and upsert tokens
    pub audience: String,
    /// Audience required on entitlement administration tokens
    pub entitlement_audience: String,
}

impl Default for KasSettings {
    fn default() -> Self {
        Self {
            audience: "tdf-client".to_string(),
            entitlement_audience: DEFAULT_ENTITLEMENT_AUDIENCE.to_string(),
        }
    }
}

pub struct Application {
    pub key_master: Arc<KeyMaster>,
    pub policy_cache: Arc<AttributePolicyCache>,
    pub plugins: Arc<PluginRunner>,
    pub oidc: Arc<OidcVerifier>,
    pub registry: AttributeRegistry,
    pub entitlements: EntitlementStore,
    pub settings: KasSettings,
}

impl Application {
    pub fn builder(key_master: KeyMaster, oidc: OidcVerifier) -> ApplicationBuilder {
        ApplicationBuilder {
            key_master,
            oidc,
            registry: AttributeRegistry::default(),
            entitlements: None,
            settings: KasSettings::default(),
            retry: RetryConfig::default(),
            rewrap_plugins: Vec::new(),
            upsert_plugins: Vec::new(),
            default_plugins: true,
        }
    }

    /// Verify the caller's bearer token for an audience
    pub async fn authenticate(&self, ctx: &RequestContext, audience: &str) -> Result<AccessToken, KasError> {
        let token = ctx.bearer()?;
        let access = self.oidc.verify(token, audience).await?;
        debug!(sub = %access.sub, audience, "Caller authenticated");
        Ok(access)
    }

    /// KAS public key PEM for `algorithm`
    pub fn public_key(&self, algorithm: Option<&str>) -> Result<String, KasError> {
        Ok(self.key_master.kas_public_key(algorithm)?)
    }

    /// Keys are loaded and the issuer's keys can be fetched
    pub async fn is_ready(&self) -> bool {
        self.key_master.is_ready() && self.oidc.ready().await
    }

    pub async fn list_entitlements(&self, ctx: &RequestContext) -> Result<EntitlementListing, KasError> {
        self.authenticate(ctx, &self.settings.entitlement_audience).await?;
        Ok(self.entitlements.list().await?)
    }

    pub async fn add_entitlements(
        &self,
        ctx: &RequestContext,
        entity_id: &str,
        uris: &[String],
    ) -> Result<Vec<EntitlementRow>, KasError> {
        let caller = self.authenticate(ctx, &self.settings.entitlement_audience).await?;
        let rows = self.entitlements.add(entity_id, uris).await?;
        info!(by = %caller.sub, entity = entity_id, count = rows.len(), "Entitlements granted");
        Ok(rows)
    }

    pub async fn remove_entitlements(
        &self,
        ctx: &RequestContext,
        entity_id: &str,
        uris: &[String],
    ) -> Result<usize, KasError> {
        let caller = self.authenticate(ctx, &self.settings.entitlement_audience).await?;
        let removed = self.entitlements.remove(entity_id, uris).await?;
        info!(by = %caller.sub, entity = entity_id, removed, "Entitlements revoked");
        Ok(removed)
    }
}

pub struct ApplicationBuilder {
    key_master: KeyMaster,
    oidc: OidcVerifier,
    registry: AttributeRegistry,
    entitlements: Option<EntitlementStore>,
    settings: KasSettings,
    retry: RetryConfig,
    rewrap_plugins: Vec<Arc<dyn RewrapPlugin>>,
    upsert_plugins: Vec<Arc<dyn UpsertPlugin>>,
    default_plugins: bool,
}

impl ApplicationBuilder {
    pub fn registry(mut self, registry: AttributeRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn entitlements(mut self, store: EntitlementStore) -> Self {
        self.entitlements = Some(store);
        self
    }

    pub fn settings(mut self, settings: KasSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Timeout and retry policy for plugin calls
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn rewrap_plugin(mut self, plugin: Arc<dyn RewrapPlugin>) -> Self {
        self.rewrap_plugins.push(plugin);
        self
    }

    pub fn upsert_plugin(mut self, plugin: Arc<dyn UpsertPlugin>) -> Self {
        self.upsert_plugins.push(plugin);
        self
    }

    /// Skip the registry attribute and policy ledger plugins
    pub fn without_default_plugins(mut self) -> Self {
        self.default_plugins = false;
        self
    }

    pub fn build(self) -> Application {
        let mut runner = PluginRunner::new(self.retry);
        if self.default_plugins {
            runner = runner
                .with_rewrap_plugin(Arc::new(RegistryAttributePlugin::new(self.registry.clone())))
                .with_upsert_plugin(Arc::new(PolicyLedgerUpsertPlugin::new()));
        }
        for plugin in self.rewrap_plugins {
            runner = runner.with_rewrap_plugin(plugin);
        }
        for plugin in self.upsert_plugins {
            runner = runner.with_upsert_plugin(plugin);
        }
        let plugins = Arc::new(runner);
        let policy_cache = AttributePolicyCache::with_fetcher(Arc::new(PluginAttributeFetcher::new(plugins.clone())));

        let entitlements = self
            .entitlements
            .unwrap_or_else(|| EntitlementStore::default().with_registry(self.registry.clone()));

        Application {
            key_master: Arc::new(self.key_master),
            policy_cache: Arc::new(policy_cache),
            plugins,
            oidc: Arc::new(self.oidc),
            registry: self.registry,
            entitlements,
            settings: self.settings,
        }
    }
}
