//! Fixtures for driving the router in-process

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use http_body_util::BodyExt;
use jsonwebtoken::{jwk::JwkSet, Algorithm, EncodingKey, Header};
use opentdf_authz::{AttributeName, AttributeRegistry, CanonicalPolicy, EntitlementStore, PolicyBuilder, Rule};
use opentdf_kas::opentdf_crypto::p256::{self, pkcs8::EncodePrivateKey as _};
use opentdf_kas::opentdf_crypto::{calculate_policy_binding, generate_key_32, keys, wrap_key_with_rsa_oaep};
use opentdf_kas::{Application, KasSettings, KeyMaster, OidcVerifier, RetryConfig, StaticJwksSource};
use opentdf_kas_server::router;
use rand::rngs::OsRng;
use rsa::pkcs1::EncodeRsaPrivateKey as _;
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde_json::{json, Value};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tower::ServiceExt;

pub const NS: &str = "https://ex.com";
pub const REALM: &str = "tdf";
pub const ISSUER: &str = "https://keycloak.ex.com/auth/realms/tdf";
pub const CLIENT_AUDIENCE: &str = "tdf-client";
pub const ENTITLEMENT_AUDIENCE: &str = "tdf-entitlement";
const ISSUER_KID: &str = "issuer-1";

pub struct Keys {
    pub kas_rsa_pem: String,
    pub kas_ec_pem: String,
    pub issuer_pem: String,
    pub issuer_public: RsaPublicKey,
    pub client: RsaPrivateKey,
    pub client_pem: String,
}

pub fn shared() -> &'static Keys {
    static KEYS: OnceLock<Keys> = OnceLock::new();
    KEYS.get_or_init(|| {
        let kas = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
        let issuer = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
        let client = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
        let lf = rsa::pkcs1::LineEnding::LF;
        Keys {
            kas_rsa_pem: kas.to_pkcs1_pem(lf).unwrap().to_string(),
            kas_ec_pem: p256::SecretKey::random(&mut OsRng)
                .to_pkcs8_pem(p256::pkcs8::LineEnding::LF)
                .unwrap()
                .to_string(),
            issuer_pem: issuer.to_pkcs1_pem(lf).unwrap().to_string(),
            issuer_public: RsaPublicKey::from(&issuer),
            client_pem: client.to_pkcs1_pem(lf).unwrap().to_string(),
            client,
        }
    })
}

pub fn client_public_pem() -> String {
    keys::rsa_public_pem(&RsaPublicKey::from(&shared().client)).unwrap()
}

fn issuer_jwks() -> JwkSet {
    let public = &shared().issuer_public;
    serde_json::from_value(json!({
        "keys": [{
            "kty": "RSA",
            "kid": ISSUER_KID,
            "alg": "RS256",
            "n": URL_SAFE_NO_PAD.encode(public.n().to_bytes_be()),
            "e": URL_SAFE_NO_PAD.encode(public.e().to_bytes_be()),
        }]
    }))
    .unwrap()
}

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Bearer token for `subject` holding `NS/attr/...` suffixes
pub fn token(subject: &str, audience: &str, attributes: &[&str]) -> String {
    mint(subject, audience, ISSUER, attributes)
}

/// Bearer token for "alice" from another issuer
pub fn token_from(issuer: &str, audience: &str) -> String {
    mint("alice", audience, issuer, &[])
}

fn mint(subject: &str, audience: &str, issuer: &str, attributes: &[&str]) -> String {
    let entity_attributes: Vec<Value> = attributes
        .iter()
        .map(|a| json!({ "attribute": format!("{}/attr/{}", NS, a) }))
        .collect();
    let claims = json!({
        "sub": subject,
        "aud": audience,
        "iss": issuer,
        "exp": now() + 300,
        "tdf_claims": {
            "client_public_signing_key": client_public_pem(),
            "entitlements": [{ "entity_identifier": subject, "entity_attributes": entity_attributes }]
        }
    });
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(ISSUER_KID.to_string());
    let key = EncodingKey::from_rsa_pem(shared().issuer_pem.as_bytes()).unwrap();
    jsonwebtoken::encode(&header, &claims, &key).unwrap()
}

/// `{signedRequestToken}` wrapping `body`, signed by the client key
pub fn envelope(body: &Value) -> Value {
    let claims = json!({ "requestBody": body.to_string(), "iat": now(), "exp": now() + 60 });
    let key = EncodingKey::from_rsa_pem(shared().client_pem.as_bytes()).unwrap();
    let token = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key).unwrap();
    json!({ "signedRequestToken": token })
}

/// Rewrap body for a fresh object key protected under the KAS RSA key
pub fn rewrap_body(app: &Application, data_attributes: &[&str]) -> (Value, [u8; 32]) {
    let mut builder = PolicyBuilder::new();
    for attr in data_attributes {
        builder = builder.attribute_uri(format!("{}/attr/{}", NS, attr)).unwrap();
    }
    let canonical = CanonicalPolicy::from_policy(builder.build()).unwrap().raw().to_string();
    let key = generate_key_32();
    let kas_public = app.public_key(None).unwrap();
    let body = json!({
        "keyAccess": {
            "type": "wrapped",
            "url": "https://kas.ex.com",
            "protocol": "kas",
            "wrappedKey": wrap_key_with_rsa_oaep(&key, &kas_public).unwrap(),
            "policyBinding": calculate_policy_binding(&key, canonical.as_bytes()).unwrap(),
        },
        "policy": canonical,
        "clientPublicKey": client_public_pem(),
    });
    (body, key)
}

pub struct TestServer {
    pub app: Arc<Application>,
    pub jwks: Arc<StaticJwksSource>,
    pub router: Router,
}

impl TestServer {
    pub async fn new() -> Self {
        let k = shared();
        let key_master = KeyMaster::load(Some(&k.kas_rsa_pem), None, Some(&k.kas_ec_pem), None).unwrap();

        let jwks = Arc::new(StaticJwksSource::new());
        jwks.insert(REALM, issuer_jwks());
        let oidc = OidcVerifier::new(jwks.clone()).with_realm(Some(REALM.to_string()));

        let registry = AttributeRegistry::default();
        registry
            .create_name(AttributeName::new(NS, "Rel", Rule::AnyOf, Vec::new()))
            .await
            .unwrap();
        registry
            .create_name(AttributeName::new(NS, "A", Rule::Hierarchy, vec!["x".into(), "y".into()]))
            .await
            .unwrap();

        let app = Arc::new(
            Application::builder(key_master, oidc)
                .entitlements(EntitlementStore::default().with_registry(registry.clone()))
                .registry(registry)
                .retry(RetryConfig::no_retry(Duration::from_secs(2)))
                .settings(KasSettings {
                    audience: CLIENT_AUDIENCE.to_string(),
                    entitlement_audience: ENTITLEMENT_AUDIENCE.to_string(),
                })
                .build(),
        );
        Self {
            router: router(app.clone()),
            app,
            jwks,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }
}

pub fn request(method: &str, uri: &str, bearer: Option<&str>, body: Option<&Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
