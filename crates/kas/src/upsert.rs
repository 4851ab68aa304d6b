//! Upsert service: forward a bound policy to the upsert plugins

use crate::app::{Application, RequestContext, SignedRequestEnvelope};
use crate::oidc::verify_request_token;
use crate::plugins::UpsertRequest;
use crate::rewrap::{check_binding, unwrap_object_key};
use opentdf_authz::{CanonicalPolicy, KasError, KeyAccessError, KeyAccessObject, KeyAccessUse};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertBody {
    key_access: Value,
    policy: String,
}

impl Application {
    /// Handle a `/v2/upsert` request; returns one status per upsert plugin
    pub async fn upsert(&self, envelope: &SignedRequestEnvelope, ctx: &RequestContext) -> Result<Vec<String>, KasError> {
        let claims = self.authenticate(ctx, &self.settings.audience).await?.claims()?;
        let signed = verify_request_token(
            &envelope.signed_request_token,
            &claims.client_public_signing_key,
            self.oidc.leeway(),
        )?;

        let body: UpsertBody = serde_json::from_str(&signed.request_body)
            .map_err(|e| KasError::BadRequest(format!("requestBody: {}", e)))?;
        let kao = KeyAccessObject::parse(&body.key_access, KeyAccessUse::Upsert)?;
        let canonical = CanonicalPolicy::parse(body.policy)?;

        if kao.requires_binding(KeyAccessUse::Upsert) {
            let key = unwrap_object_key(self, &kao)?;
            check_binding(&key, &canonical, &kao)?;
            debug!(policy = %canonical.policy().uuid, "Upsert policy binding verified");
        } else if kao.header.is_some() {
            return Err(KeyAccessError::Unsupported("NanoTDF upsert".to_string()).into());
        }

        let req = UpsertRequest {
            policy: canonical.into_policy(),
            claims,
            key_access: kao,
            context: ctx.clone(),
        };
        let statuses = self.plugins.run_upsert(&req).await?;
        info!(policy = %req.policy.uuid, plugins = statuses.len(), "Policy upserted");
        Ok(statuses)
    }
}
