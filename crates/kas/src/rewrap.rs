//! Rewrap service
//!
//! Releases an object key to a caller whose verified attributes satisfy the
//! object's policy. Steps run strictly in order:
//!
//! 1. bearer token extracted and verified against the issuer's keys
//! 2. request envelope verified under the caller's declared signing key
//! 3. body, policy and key access object parsed
//! 4. object key recovered and the policy binding checked
//! 5. rewrap plugins run; attribute rules loaded for the resulting policy
//! 6. adjudication
//! 7. object key wrapped for the caller, optionally in a signed response
//!
//! `wrapped` KAOs use RSA-OAEP and an HMAC binding. Requests with
//! `algorithm = "ec:secp256r1"` carry a NanoTDF header instead and use ECDH
//! with an ECDSA or GMAC binding.

use crate::app::{Application, RequestContext, SignedRequestEnvelope};
use crate::key_master::{PrivateKeyMaterial, ALGORITHM_EC_SECP256R1, ALGORITHM_RSA_2048, KID_EC, KID_RSA};
use crate::nanotdf::NanoTdfHeader;
use crate::oidc::verify_request_token;
use crate::plugins::{RewrapRequest, RewrapResponse};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use jsonwebtoken::{Algorithm, Header};
use opentdf_authz::{
    Adjudicator, CanonicalPolicy, Claims, Decision, KasError, KeyAccessError, KeyAccessObject, KeyAccessType,
    KeyAccessUse, Policy,
};
use opentdf_crypto::{
    keys, verify_policy_binding, wrap_key_with_rsa_oaep, EcdhKem, EncryptedMetadata, KemError, RsaOaepKem, SymmetricKey,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

/// Lifetime of a signed rewrap response
pub const SIGNED_RESPONSE_TTL_SECS: i64 = 60;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RewrapBody {
    key_access: Value,
    #[serde(default)]
    policy: Option<String>,
    client_public_key: String,
    #[serde(default)]
    algorithm: Option<String>,
    #[serde(default)]
    signed_response: bool,
}

/// Successful rewrap result
#[derive(Debug, Clone, PartialEq)]
pub enum RewrapOutcome {
    /// `{entityWrappedKey, metadata, …}`
    Json(Value),
    /// Compact JWT carrying the same fields
    Signed(String),
}

fn bad_request(what: &str, err: impl std::fmt::Display) -> KasError {
    KasError::BadRequest(format!("{}: {}", what, err))
}

/// Recover the object key of a `wrapped` KAO under the RSA key named by its kid
pub(crate) fn unwrap_object_key(app: &Application, kao: &KeyAccessObject) -> Result<SymmetricKey, KasError> {
    let rsa_key = match app.key_master.private_for_kid(kao.kid.as_deref())? {
        PrivateKeyMaterial::Rsa(key) => key,
        PrivateKeyMaterial::Ec(_) => {
            return Err(KeyAccessError::InvalidField {
                field: "kid",
                reason: "does not name an RSA key".to_string(),
            }
            .into())
        }
    };
    unwrap_with(rsa_key, &kao.wrapped_key_bytes()?)
}

fn unwrap_with(key: &rsa::RsaPrivateKey, wrapped: &[u8]) -> Result<SymmetricKey, KasError> {
    RsaOaepKem::with_sha1()
        .unwrap_key(wrapped, key)
        .map_err(|_| KasError::KeyAccess("unable to unwrap the object key".to_string()))
}

/// Check the HMAC binding of a canonical policy under an unwrapped key
pub(crate) fn check_binding(
    key: &SymmetricKey,
    canonical: &CanonicalPolicy,
    kao: &KeyAccessObject,
) -> Result<(), KasError> {
    verify_policy_binding(key.as_slice(), canonical.binding_bytes(), &kao.policy_binding_bytes()?)?;
    Ok(())
}

fn client_key_error(err: KemError) -> KasError {
    match err {
        KemError::InvalidPublicKey(reason) => bad_request("clientPublicKey", reason),
        other => other.into(),
    }
}

impl Application {
    /// Handle a `/v2/rewrap` request
    pub async fn rewrap(&self, envelope: &SignedRequestEnvelope, ctx: &RequestContext) -> Result<RewrapOutcome, KasError> {
        let claims = self.authenticate(ctx, &self.settings.audience).await?.claims()?;
        let signed = verify_request_token(
            &envelope.signed_request_token,
            &claims.client_public_signing_key,
            self.oidc.leeway(),
        )?;

        let body: RewrapBody = serde_json::from_str(&signed.request_body).map_err(|e| bad_request("requestBody", e))?;
        let kao = KeyAccessObject::parse(&body.key_access, KeyAccessUse::Rewrap)?;
        if kao.access_type == KeyAccessType::RemoteWrapped {
            return Err(KeyAccessError::Unsupported(KeyAccessType::RemoteWrapped.to_string()).into());
        }

        let fields = match body.algorithm.as_deref() {
            Some(ALGORITHM_EC_SECP256R1) => self.rewrap_nano(&body, kao, &claims, ctx).await?,
            None | Some(ALGORITHM_RSA_2048) => self.rewrap_wrapped(&body, kao, &claims, ctx).await?,
            Some(other) => return Err(bad_request("algorithm", format!("unsupported '{}'", other))),
        };

        if body.signed_response {
            return self.sign_response(fields).map(RewrapOutcome::Signed);
        }
        Ok(RewrapOutcome::Json(Value::Object(fields)))
    }

    async fn rewrap_wrapped(
        &self,
        body: &RewrapBody,
        kao: KeyAccessObject,
        claims: &Claims,
        ctx: &RequestContext,
    ) -> Result<Map<String, Value>, KasError> {
        let raw_policy = body
            .policy
            .as_deref()
            .ok_or(KeyAccessError::MissingField("policy"))?;
        let canonical = CanonicalPolicy::parse(raw_policy)?;

        let key = unwrap_object_key(self, &kao)?;
        check_binding(&key, &canonical, &kao)?;
        debug!(policy = %canonical.policy().uuid, "Policy binding verified");

        let metadata = match kao.encrypted_metadata.as_deref() {
            Some(encoded) => Some(
                EncryptedMetadata::open(key.as_slice(), encoded)
                    .map_err(|_| KasError::KeyAccess("encrypted metadata could not be opened".to_string()))?,
            ),
            None => None,
        };

        let (req, mut res) = self
            .run_rewrap_plugins(canonical.into_policy(), kao, claims, ctx, metadata)
            .await?;
        if let Some(wrapped) = res.entity_wrapped_key() {
            info!(policy = %req.policy.uuid, "Rewrap satisfied by plugin");
            let wrapped = wrapped.to_string();
            return Ok(response_fields(wrapped, res));
        }

        let key = match res.kas_wrapped_key() {
            Some(replacement) => {
                let bytes = BASE64.decode(replacement).map_err(|e| KasError::PluginFailed(format!("kasWrappedKey: {}", e)))?;
                let rsa_key = self.key_master.rsa_private()?;
                unwrap_with(rsa_key, &bytes)?
            }
            None => key,
        };
        res.fields.remove("kasWrappedKey");

        self.adjudicate(&req).await?;

        let entity_wrapped_key = wrap_key_with_rsa_oaep(key.as_slice(), &body.client_public_key).map_err(client_key_error)?;
        info!(policy = %req.policy.uuid, entity = %req.entity.user_id, "Object key released");
        Ok(response_fields(entity_wrapped_key, res))
    }

    async fn rewrap_nano(
        &self,
        body: &RewrapBody,
        kao: KeyAccessObject,
        claims: &Claims,
        ctx: &RequestContext,
    ) -> Result<Map<String, Value>, KasError> {
        let header = NanoTdfHeader::parse(&kao.header_bytes()?)?;
        let object_key = header.object_key(self.key_master.ec_private()?)?;
        header.verify_binding()?;
        let canonical = CanonicalPolicy::parse(header.canonical_policy(&object_key)?)?;
        debug!(policy = %canonical.policy().uuid, kas = %header.kas.url(), "NanoTDF policy binding verified");

        let (req, mut res) = self
            .run_rewrap_plugins(canonical.into_policy(), kao, claims, ctx, None)
            .await?;
        if let Some(wrapped) = res.entity_wrapped_key() {
            info!(policy = %req.policy.uuid, "Rewrap satisfied by plugin");
            let wrapped = wrapped.to_string();
            return Ok(response_fields(wrapped, res));
        }
        res.fields.remove("kasWrappedKey");

        self.adjudicate(&req).await?;

        let client = keys::parse_ec_public_pem(&body.client_public_key).map_err(|e| bad_request("clientPublicKey", e))?;
        let (session_public, sealed) = EcdhKem::new(header.version)
            .wrap_ephemeral(object_key.as_slice(), &client)
            .map_err(client_key_error)?;
        let session_pem = keys::ec_public_pem(&session_public)?;

        info!(policy = %req.policy.uuid, entity = %req.entity.user_id, "NanoTDF object key released");
        let mut fields = response_fields(BASE64.encode(sealed), res);
        fields.insert("sessionPublicKey".to_string(), Value::String(session_pem));
        Ok(fields)
    }

    /// Run the plugin pipeline, then load rules for the policy it produced
    async fn run_rewrap_plugins(
        &self,
        policy: Policy,
        key_access: KeyAccessObject,
        claims: &Claims,
        ctx: &RequestContext,
        metadata: Option<Value>,
    ) -> Result<(RewrapRequest, RewrapResponse), KasError> {
        let req = RewrapRequest {
            policy,
            entity: claims.entity()?,
            claims: claims.clone(),
            key_access,
            context: ctx.clone(),
        };
        let (req, res) = self.plugins.run_rewrap(req, RewrapResponse::new(metadata)).await?;

        let names = req.policy.data_attribute_names();
        let configs = self.plugins.fetch_attributes(&names).await?;
        self.policy_cache
            .load_config(&configs)
            .map_err(|e| KasError::PluginFailed(e.to_string()))?;
        let missing = self.policy_cache.ensure(&names).await;
        if !missing.is_empty() {
            debug!(?missing, "No attribute rule available");
        }
        Ok((req, res))
    }

    async fn adjudicate(&self, req: &RewrapRequest) -> Result<(), KasError> {
        match Adjudicator::new(&self.policy_cache).decide(&req.policy, &req.entity).await {
            Decision::Permit => Ok(()),
            Decision::Deny(reason) => {
                warn!(policy = %req.policy.uuid, entity = %req.entity.user_id, reason = reason.code(), "Rewrap denied");
                Err(reason.into())
            }
        }
    }

    fn sign_response(&self, mut fields: Map<String, Value>) -> Result<String, KasError> {
        let (algorithm, key) = self.key_master.response_signing_key()?;
        let now = chrono::Utc::now().timestamp();
        fields.insert("iat".to_string(), Value::from(now));
        fields.insert("exp".to_string(), Value::from(now + SIGNED_RESPONSE_TTL_SECS));

        let mut header = Header::new(algorithm);
        header.kid = Some(if algorithm == Algorithm::ES256 { KID_EC } else { KID_RSA }.to_string());
        jsonwebtoken::encode(&header, &Value::Object(fields), &key).map_err(|e| KasError::Crypto(e.to_string()))
    }
}

fn response_fields(entity_wrapped_key: String, res: RewrapResponse) -> Map<String, Value> {
    let mut fields = res.fields;
    fields.insert("entityWrappedKey".to_string(), Value::String(entity_wrapped_key));
    fields.insert(
        "metadata".to_string(),
        res.metadata.unwrap_or_else(|| Value::Object(Map::new())),
    );
    fields
}
