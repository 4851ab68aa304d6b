//! Build the `Application` from configuration

use crate::config::{ConfigError, KasConfig};
use opentdf_authz::{AttributeName, AttributePolicyConfig, AttributeRegistry, Rule};
use opentdf_kas::{Application, HttpJwksSource, KasSettings, KeyMaster, OidcVerifier, RetryConfig};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub async fn build_application(config: &KasConfig) -> Result<Application, ConfigError> {
    let key_master = if config.keys.is_empty() {
        warn!("No KAS private keys configured, generating ephemeral keys");
        KeyMaster::generate()?
    } else {
        KeyMaster::load(
            config.keys.rsa_private.as_deref(),
            config.keys.rsa_certificate.as_deref(),
            config.keys.ec_private.as_deref(),
            config.keys.ec_certificate.as_deref(),
        )?
    };

    let retry = RetryConfig::default().with_timeout(config.fetch_timeout);
    let source = Arc::new(HttpJwksSource::new(config.oidc.server_url.clone(), retry.clone()));
    let oidc = OidcVerifier::new(source)
        .with_realm(config.oidc.realm.clone())
        .with_leeway(config.jwt_leeway)
        .with_ttl(config.jwks_ttl);

    let registry = AttributeRegistry::default();
    if let Some(path) = &config.attributes_file {
        let count = load_attributes(path, &registry).await?;
        info!(path = %path.display(), count, "Seeded attribute registry");
    }

    if config.database.is_configured() {
        info!(
            host = ?config.database.host,
            database = ?config.database.database,
            schema = ?config.database.schema,
            "Postgres settings present, repositories stay in memory"
        );
    }

    let settings = KasSettings {
        audience: config.rewrap_audience(),
        entitlement_audience: config.oidc.audience.clone(),
    };
    info!(
        oidc = %config.oidc.server_url,
        realm = ?config.oidc.realm,
        audience = %settings.audience,
        "KAS configured"
    );

    Ok(Application::builder(key_master, oidc)
        .registry(registry)
        .retry(retry)
        .settings(settings)
        .build())
}

/// Register every attribute name listed in a JSON file
pub async fn load_attributes(path: &Path, registry: &AttributeRegistry) -> Result<usize, ConfigError> {
    let fail = |reason: String| ConfigError::Attributes {
        path: path.display().to_string(),
        reason,
    };

    let raw = tokio::fs::read_to_string(path).await.map_err(|e| fail(e.to_string()))?;
    let configs: Vec<AttributePolicyConfig> = serde_json::from_str(&raw).map_err(|e| fail(e.to_string()))?;

    for config in &configs {
        let rule = match config.rule.as_deref() {
            Some(raw) => Rule::parse(raw).ok_or_else(|| fail(format!("unknown rule '{}'", raw)))?,
            None => Rule::AllOf,
        };
        let name = AttributeName::new(
            &config.authority_namespace,
            &config.name,
            rule,
            config.order.clone().unwrap_or_default(),
        );
        registry.create_name(name).await.map_err(|e| fail(e.to_string()))?;
    }
    Ok(configs.len())
}
