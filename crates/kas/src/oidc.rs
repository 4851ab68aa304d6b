//! OIDC bearer token and signed request verification
//!
//! Access tokens are verified against the issuer realm's JWKS, fetched
//! through a [`JwksSource`] and cached per realm with a TTL. At most one
//! fetch per realm is in flight. The audience and realm are checked on the
//! unverified claims first, so a token for another audience never triggers
//! a fetch.

use crate::error::OidcError;
use crate::retry::{retry, RetryConfig, RetryableError};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use dashmap::DashMap;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use opentdf_authz::{Claims, ClaimsError, KeyedLocks, TdfClaims};
use opentdf_crypto::keys::{self, KeyFamily};
use serde::{Deserialize, Deserializer};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_JWKS_TTL: Duration = Duration::from_secs(300);
/// Minimum age of a realm's keys before an unknown `kid` may refetch them
pub const DEFAULT_JWKS_MIN_REFRESH: Duration = Duration::from_secs(30);
pub const DEFAULT_LEEWAY_SECS: u64 = 30;

const ACCESS_TOKEN_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
];

impl RetryableError for OidcError {
    fn is_retryable(&self) -> bool {
        matches!(self, OidcError::Fetch(_))
    }

    fn timed_out(after: Duration) -> Self {
        OidcError::Fetch(format!("timed out after {:?}", after))
    }
}

/// Where issuer keys come from
#[async_trait]
pub trait JwksSource: Send + Sync {
    async fn fetch(&self, realm: &str) -> Result<JwkSet, OidcError>;
}

/// Keycloak-style certs endpoint: `{server}/realms/{realm}/protocol/openid-connect/certs`
pub struct HttpJwksSource {
    client: reqwest::Client,
    server_url: String,
    retry: RetryConfig,
}

impl HttpJwksSource {
    pub fn new(server_url: impl Into<String>, retry: RetryConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            server_url: server_url.into(),
            retry,
        }
    }

    pub fn certs_url(&self, realm: &str) -> String {
        format!(
            "{}/realms/{}/protocol/openid-connect/certs",
            self.server_url.trim_end_matches('/'),
            realm
        )
    }
}

#[async_trait]
impl JwksSource for HttpJwksSource {
    async fn fetch(&self, realm: &str) -> Result<JwkSet, OidcError> {
        let url = self.certs_url(realm);
        debug!(%url, "Fetching issuer keys");
        retry(&self.retry, "jwks", || async {
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| OidcError::Fetch(e.to_string()))?;
            response
                .json::<JwkSet>()
                .await
                .map_err(|e| OidcError::Fetch(e.to_string()))
        })
        .await
    }
}

/// In-memory key source; counts fetches
#[derive(Default)]
pub struct StaticJwksSource {
    sets: DashMap<String, JwkSet>,
    fetches: AtomicUsize,
    offline: AtomicBool,
}

impl StaticJwksSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, realm: &str, set: JwkSet) {
        self.sets.insert(realm.to_string(), set);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Make every fetch fail as if the issuer were unreachable
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

#[async_trait]
impl JwksSource for StaticJwksSource {
    async fn fetch(&self, realm: &str) -> Result<JwkSet, OidcError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(OidcError::Fetch("issuer offline".to_string()));
        }
        self.sets
            .get(realm)
            .map(|set| set.clone())
            .ok_or_else(|| OidcError::Fetch(format!("unknown realm {}", realm)))
    }
}

/// Per-realm JWKS cache with single-flight refresh
pub struct JwksCache {
    source: Arc<dyn JwksSource>,
    ttl: Duration,
    min_refresh: Duration,
    entries: DashMap<String, (Instant, Arc<JwkSet>)>,
    inflight: KeyedLocks,
}

impl JwksCache {
    pub fn new(source: Arc<dyn JwksSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            min_refresh: DEFAULT_JWKS_MIN_REFRESH,
            entries: DashMap::new(),
            inflight: KeyedLocks::new(),
        }
    }

    #[must_use]
    pub fn with_min_refresh(mut self, min_refresh: Duration) -> Self {
        self.min_refresh = min_refresh;
        self
    }

    /// Cached set no older than `max_age`
    fn cached(&self, realm: &str, max_age: Duration) -> Option<Arc<JwkSet>> {
        let entry = self.entries.get(realm)?;
        let (loaded_at, set) = entry.value();
        if loaded_at.elapsed() > max_age {
            return None;
        }
        Some(set.clone())
    }

    pub async fn get(&self, realm: &str) -> Result<Arc<JwkSet>, OidcError> {
        self.load(realm, self.ttl).await
    }

    /// Refetch a realm's keys unless they were loaded within the minimum
    /// refresh interval, in which case the cached set is returned
    pub async fn refresh(&self, realm: &str) -> Result<Arc<JwkSet>, OidcError> {
        self.load(realm, self.min_refresh.min(self.ttl)).await
    }

    async fn load(&self, realm: &str, max_age: Duration) -> Result<Arc<JwkSet>, OidcError> {
        if let Some(set) = self.cached(realm, max_age) {
            return Ok(set);
        }
        let _guard = self.inflight.lock(realm).await;

        if let Some(set) = self.cached(realm, max_age) {
            return Ok(set);
        }
        let set = Arc::new(self.source.fetch(realm).await?);
        info!(realm, keys = set.keys.len(), "Loaded issuer keys");
        self.entries.insert(realm.to_string(), (Instant::now(), set.clone()));
        Ok(set)
    }

    /// Realms with a fetch in flight
    pub fn inflight(&self) -> usize {
        self.inflight.len()
    }

    pub fn invalidate(&self, realm: &str) {
        self.entries.remove(realm);
    }
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(value)) => vec![value],
        Some(OneOrMany::Many(values)) => values,
    })
}

/// Verified access token claims
#[derive(Debug, Clone, Deserialize)]
pub struct AccessToken {
    pub sub: String,
    #[serde(default, deserialize_with = "one_or_many")]
    pub aud: Vec<String>,
    pub iss: String,
    pub exp: u64,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub tdf_claims: Option<TdfClaims>,
}

impl AccessToken {
    /// Claims bundle for the rewrap pipeline; requires `tdf_claims`
    pub fn claims(&self) -> Result<Claims, ClaimsError> {
        let tdf = self.tdf_claims.as_ref().ok_or(ClaimsError::Missing("tdf_claims"))?;
        if tdf.client_public_signing_key.trim().is_empty() {
            return Err(ClaimsError::Missing("client_public_signing_key"));
        }
        Ok(Claims {
            subject: self.sub.clone(),
            email: self.email.clone(),
            preferred_username: self.preferred_username.clone(),
            audience: self.aud.clone(),
            client_public_signing_key: tdf.client_public_signing_key.clone(),
            entitlements: tdf.entitlements.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct UnverifiedClaims {
    #[serde(default)]
    iss: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    aud: Vec<String>,
}

fn unverified_claims(token: &str) -> Result<UnverifiedClaims, OidcError> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| OidcError::Malformed("not a compact JWT".to_string()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| OidcError::Malformed(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| OidcError::Malformed(e.to_string()))
}

/// Realm named by an issuer URL: its last path segment
pub fn realm_of(issuer: &str) -> Option<&str> {
    issuer.trim_end_matches('/').rsplit('/').next().filter(|s| !s.is_empty())
}

/// Extract the token from an `Authorization: Bearer …` value
pub fn bearer_token(header: Option<&str>) -> Result<&str, OidcError> {
    let value = header.ok_or(OidcError::MissingBearer)?.trim();
    let (scheme, token) = value.split_once(' ').ok_or(OidcError::MissingBearer)?;
    if !scheme.eq_ignore_ascii_case("bearer") || token.trim().is_empty() {
        return Err(OidcError::MissingBearer);
    }
    Ok(token.trim())
}

fn map_decode_error(err: jsonwebtoken::errors::Error, audience: &str) -> OidcError {
    match err.kind() {
        ErrorKind::ExpiredSignature => OidcError::Expired,
        ErrorKind::InvalidSignature => OidcError::InvalidSignature,
        ErrorKind::InvalidAudience => OidcError::AudienceMismatch(audience.to_string()),
        ErrorKind::InvalidAlgorithm => OidcError::UnsupportedAlgorithm(format!("{:?}", err)),
        _ => OidcError::Malformed(err.to_string()),
    }
}

pub struct OidcVerifier {
    jwks: JwksCache,
    realm: Option<String>,
    leeway: u64,
}

impl OidcVerifier {
    pub fn new(source: Arc<dyn JwksSource>) -> Self {
        Self {
            jwks: JwksCache::new(source, DEFAULT_JWKS_TTL),
            realm: None,
            leeway: DEFAULT_LEEWAY_SECS,
        }
    }

    /// Only accept tokens issued by this realm
    pub fn with_realm(mut self, realm: Option<String>) -> Self {
        self.realm = realm;
        self
    }

    pub fn with_leeway(mut self, seconds: u64) -> Self {
        self.leeway = seconds;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.jwks.ttl = ttl;
        self
    }

    /// Minimum interval between `kid`-miss refetches of one realm's keys
    pub fn with_min_refresh(mut self, min_refresh: Duration) -> Self {
        self.jwks.min_refresh = min_refresh;
        self
    }

    pub fn leeway(&self) -> u64 {
        self.leeway
    }

    /// Verify signature, expiry and audience of an access token
    pub async fn verify(&self, token: &str, audience: &str) -> Result<AccessToken, OidcError> {
        let unverified = unverified_claims(token)?;
        if !unverified.aud.iter().any(|a| a == audience) {
            return Err(OidcError::AudienceMismatch(audience.to_string()));
        }
        let issuer = unverified
            .iss
            .ok_or_else(|| OidcError::Malformed("missing iss".to_string()))?;
        let realm = realm_of(&issuer)
            .ok_or_else(|| OidcError::Malformed("iss has no realm".to_string()))?
            .to_string();
        if let Some(expected) = &self.realm {
            if expected != &realm {
                return Err(OidcError::RealmMismatch {
                    expected: expected.clone(),
                    got: realm,
                });
            }
        }

        let header = decode_header(token).map_err(|e| OidcError::Malformed(e.to_string()))?;
        if !ACCESS_TOKEN_ALGORITHMS.contains(&header.alg) {
            return Err(OidcError::UnsupportedAlgorithm(format!("{:?}", header.alg)));
        }

        let mut validation = Validation::new(header.alg);
        validation.set_audience(&[audience]);
        validation.set_required_spec_claims(&["exp", "aud"]);
        validation.leeway = self.leeway;

        let mut jwks = self.jwks.get(&realm).await?;
        let mut candidates = matching_keys(&jwks, header.kid.as_deref());
        if candidates.is_empty() {
            if let Some(kid) = header.kid.as_deref() {
                // Issuer may have rotated keys since the cache was filled
                jwks = self.jwks.refresh(&realm).await?;
                candidates = matching_keys(&jwks, Some(kid));
                if candidates.is_empty() {
                    return Err(OidcError::UnknownKey(kid.to_string()));
                }
            } else {
                return Err(OidcError::UnknownKey("(none)".to_string()));
            }
        }

        let mut last_error = OidcError::InvalidSignature;
        for jwk in candidates {
            let key = match DecodingKey::from_jwk(jwk) {
                Ok(key) => key,
                Err(e) => {
                    warn!(realm = %realm, error = %e, "Skipping unusable issuer key");
                    continue;
                }
            };
            match decode::<AccessToken>(token, &key, &validation) {
                Ok(data) => {
                    debug!(sub = %data.claims.sub, realm = %realm, "Access token verified");
                    return Ok(data.claims);
                }
                Err(e) => last_error = map_decode_error(e, audience),
            }
        }
        Err(last_error)
    }

    /// True when the configured realm's keys can be loaded
    pub async fn ready(&self) -> bool {
        match &self.realm {
            Some(realm) => self.jwks.get(realm).await.is_ok(),
            None => true,
        }
    }
}

fn matching_keys<'a>(jwks: &'a JwkSet, kid: Option<&str>) -> Vec<&'a Jwk> {
    jwks.keys
        .iter()
        .filter(|k| kid.is_none() || k.common.key_id.as_deref() == kid)
        .collect()
}

/// Payload of a signed request envelope
#[derive(Debug, Clone, Deserialize)]
pub struct SignedRequest {
    #[serde(rename = "requestBody")]
    pub request_body: String,
}

/// Verify a request envelope under the client's signing key
///
/// The key may be an RSA or P-256 public key PEM, or a certificate.
pub fn verify_request_token(token: &str, signing_key_pem: &str, leeway: u64) -> Result<SignedRequest, OidcError> {
    let header = decode_header(token).map_err(|e| OidcError::Malformed(e.to_string()))?;
    let family = keys::public_key_family(signing_key_pem)
        .map_err(|e| OidcError::Malformed(format!("client signing key: {}", e)))?;

    let key = match family {
        KeyFamily::Rsa => {
            if !matches!(
                header.alg,
                Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 | Algorithm::PS256 | Algorithm::PS384 | Algorithm::PS512
            ) {
                return Err(OidcError::UnsupportedAlgorithm(format!("{:?}", header.alg)));
            }
            let pem = keys::parse_rsa_public_pem(signing_key_pem)
                .and_then(|k| keys::rsa_public_pem(&k))
                .map_err(|e| OidcError::Malformed(e.to_string()))?;
            DecodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| OidcError::Malformed(e.to_string()))?
        }
        KeyFamily::EcP256 => {
            if header.alg != Algorithm::ES256 {
                return Err(OidcError::UnsupportedAlgorithm(format!("{:?}", header.alg)));
            }
            let pem = keys::parse_ec_public_pem(signing_key_pem)
                .and_then(|k| keys::ec_public_pem(&k))
                .map_err(|e| OidcError::Malformed(e.to_string()))?;
            DecodingKey::from_ec_pem(pem.as_bytes()).map_err(|e| OidcError::Malformed(e.to_string()))?
        }
    };

    let mut validation = Validation::new(header.alg);
    validation.required_spec_claims.clear();
    validation.validate_aud = false;
    validation.leeway = leeway;

    decode::<SignedRequest>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => OidcError::Expired,
            ErrorKind::InvalidSignature => OidcError::InvalidSignature,
            _ => OidcError::Malformed(e.to_string()),
        })
}
