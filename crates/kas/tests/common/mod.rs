//! Common fixtures for KAS integration tests
//!
//! RSA key generation is slow, so every key is generated once per test
//! binary and shared.

#![allow(dead_code)]

use base64::{
    engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD},
    Engine as _,
};
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use opentdf_authz::{AttributeName, AttributeRegistry, CanonicalPolicy, KasError, Policy, PolicyBuilder, Rule};
use opentdf_crypto::{
    aead, calculate_policy_binding, keys, sign_ecdsa_p256, wrap_key_with_rsa_oaep, EcdhKem, KeyEncapsulation,
    RsaOaepKem,
};
use opentdf_kas::{
    Application, BindingMode, KasSettings, KeyMaster, LocatorProtocol, NanoTdfHeader, OidcVerifier, PolicyKind,
    RequestContext, ResourceLocator, RetryConfig, RewrapOutcome, SignedRequestEnvelope, StaticJwksSource,
};
use p256::pkcs8::EncodePrivateKey as _;
use rand::rngs::OsRng;
use rsa::pkcs1::EncodeRsaPrivateKey as _;
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde_json::{json, Value};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

pub const NS: &str = "https://ex.com";
pub const REALM: &str = "tdf";
pub const ISSUER: &str = "https://keycloak.ex.com/auth/realms/tdf";
pub const AUDIENCE: &str = "tdf-client";
pub const KAS_URL: &str = "https://kas.ex.com";
pub const ISSUER_KID: &str = "issuer-1";

pub const PLAINTEXT: &[u8] = b"Hello, OpenTDF! This is test data for encryption.";

struct SharedKeys {
    kas_rsa_pem: String,
    kas_ec_pem: String,
    kas_ec_public: p256::PublicKey,
    kas_rsa_public_pem: String,
    issuer_pem: String,
    issuer_public: RsaPublicKey,
    client_rsa: RsaPrivateKey,
    other_rsa: RsaPrivateKey,
}

fn shared() -> &'static SharedKeys {
    static KEYS: OnceLock<SharedKeys> = OnceLock::new();
    KEYS.get_or_init(|| {
        let kas_rsa = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
        let kas_ec = p256::SecretKey::random(&mut OsRng);
        let issuer = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
        SharedKeys {
            kas_rsa_pem: kas_rsa.to_pkcs1_pem(rsa::pkcs1::LineEnding::LF).unwrap().to_string(),
            kas_ec_pem: kas_ec.to_pkcs8_pem(p256::pkcs8::LineEnding::LF).unwrap().to_string(),
            kas_ec_public: kas_ec.public_key(),
            kas_rsa_public_pem: keys::rsa_public_pem(&RsaPublicKey::from(&kas_rsa)).unwrap(),
            issuer_pem: issuer.to_pkcs1_pem(rsa::pkcs1::LineEnding::LF).unwrap().to_string(),
            issuer_public: RsaPublicKey::from(&issuer),
            client_rsa: RsaPrivateKey::new(&mut OsRng, 2048).unwrap(),
            other_rsa: RsaPrivateKey::new(&mut OsRng, 2048).unwrap(),
        }
    })
}

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// JWKS publishing the issuer key
pub fn issuer_jwks() -> JwkSet {
    let public = &shared().issuer_public;
    serde_json::from_value(json!({
        "keys": [{
            "kty": "RSA",
            "kid": ISSUER_KID,
            "use": "sig",
            "alg": "RS256",
            "n": URL_SAFE_NO_PAD.encode(public.n().to_bytes_be()),
            "e": URL_SAFE_NO_PAD.encode(public.e().to_bytes_be()),
        }]
    }))
    .unwrap()
}

/// Sign arbitrary access token claims with the issuer key
pub fn sign_access_token(claims: &Value) -> String {
    sign_access_token_with_kid(claims, ISSUER_KID)
}

pub fn sign_access_token_with_kid(claims: &Value, kid: &str) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    let key = EncodingKey::from_rsa_pem(shared().issuer_pem.as_bytes()).unwrap();
    jsonwebtoken::encode(&header, claims, &key).unwrap()
}

/// The caller: a signing key bound into its token and an encryption key
pub struct Client {
    pub subject: String,
    pub signing: p256::SecretKey,
    pub ec: p256::SecretKey,
}

impl Client {
    pub fn new(subject: &str) -> Self {
        Self {
            subject: subject.to_string(),
            signing: p256::SecretKey::random(&mut OsRng),
            ec: p256::SecretKey::random(&mut OsRng),
        }
    }

    pub fn signing_public_pem(&self) -> String {
        keys::ec_public_pem(&self.signing.public_key()).unwrap()
    }

    pub fn rsa_public_pem(&self) -> String {
        keys::rsa_public_pem(&RsaPublicKey::from(&shared().client_rsa)).unwrap()
    }

    pub fn ec_public_pem(&self) -> String {
        keys::ec_public_pem(&self.ec.public_key()).unwrap()
    }

    pub fn access_claims(&self, attributes: &[&str]) -> Value {
        let entity_attributes: Vec<Value> = attributes
            .iter()
            .map(|a| json!({ "attribute": format!("{}/attr/{}", NS, a) }))
            .collect();
        json!({
            "sub": self.subject,
            "aud": AUDIENCE,
            "iss": ISSUER,
            "iat": now(),
            "exp": now() + 300,
            "preferred_username": self.subject,
            "tdf_claims": {
                "client_public_signing_key": self.signing_public_pem(),
                "entitlements": [{
                    "entity_identifier": self.subject,
                    "entity_attributes": entity_attributes,
                }]
            }
        })
    }

    /// Context carrying a valid bearer token with the given `NS/attr/...` suffixes
    pub fn context(&self, attributes: &[&str]) -> RequestContext {
        RequestContext::with_bearer(&sign_access_token(&self.access_claims(attributes)))
    }

    /// Envelope signed ES256 with the caller's signing key
    pub fn envelope(&self, body: &Value) -> SignedRequestEnvelope {
        let pem = self.signing.to_pkcs8_pem(p256::pkcs8::LineEnding::LF).unwrap();
        let key = EncodingKey::from_ec_pem(pem.as_bytes()).unwrap();
        sign_envelope(body, &Header::new(Algorithm::ES256), &key)
    }

    /// Envelope signed with an RSA key the caller's token does not name
    pub fn envelope_signed_by_stranger(&self, body: &Value) -> SignedRequestEnvelope {
        let pem = shared().other_rsa.to_pkcs1_pem(rsa::pkcs1::LineEnding::LF).unwrap();
        let key = EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap();
        sign_envelope(body, &Header::new(Algorithm::RS256), &key)
    }

    /// Recover an RSA-wrapped object key
    pub fn unwrap_rsa(&self, entity_wrapped_key: &str) -> Vec<u8> {
        let wrapped = BASE64.decode(entity_wrapped_key).unwrap();
        RsaOaepKem::with_sha1().unwrap(&wrapped, &shared().client_rsa).unwrap()
    }

    /// Recover a NanoTDF rewrapped key
    pub fn unwrap_nano(&self, entity_wrapped_key: &str, session_public_pem: &str, version: u8) -> Vec<u8> {
        let session = keys::parse_ec_public_pem(session_public_pem).unwrap();
        let key = EcdhKem::new(version).derive(&self.ec, &session).unwrap();
        aead::decrypt(key.as_slice(), &BASE64.decode(entity_wrapped_key).unwrap()).unwrap()
    }
}

pub fn sign_envelope(body: &Value, header: &Header, key: &EncodingKey) -> SignedRequestEnvelope {
    let claims = json!({ "requestBody": body.to_string(), "iat": now(), "exp": now() + 60 });
    SignedRequestEnvelope {
        signed_request_token: jsonwebtoken::encode(header, &claims, key).unwrap(),
    }
}

/// A protected object: key, encrypted payload and its key access object
pub struct Protected {
    pub key: [u8; 32],
    pub canonical: String,
    pub key_access: Value,
    pub payload: Vec<u8>,
}

impl Protected {
    pub fn new(data_attributes: &[&str]) -> Self {
        Self::with_dissem(data_attributes, &[])
    }

    pub fn with_dissem(data_attributes: &[&str], dissem: &[&str]) -> Self {
        let mut builder = PolicyBuilder::new().id(uuid::Uuid::new_v4().to_string());
        for attr in data_attributes {
            builder = builder.attribute_uri(format!("{}/attr/{}", NS, attr)).unwrap();
        }
        for target in dissem {
            builder = builder.dissem(*target);
        }
        Self::from_policy(builder.build())
    }

    pub fn from_policy(policy: Policy) -> Self {
        let canonical = CanonicalPolicy::from_policy(policy).unwrap().raw().to_string();

        let key = opentdf_crypto::generate_key_32();
        let key_access = json!({
            "type": "wrapped",
            "url": KAS_URL,
            "protocol": "kas",
            "kid": "r1",
            "wrappedKey": wrap_key_with_rsa_oaep(&key, &shared().kas_rsa_public_pem).unwrap(),
            "policyBinding": calculate_policy_binding(&key, canonical.as_bytes()).unwrap(),
        });
        let payload = aead::encrypt(&key, PLAINTEXT).unwrap();
        Self {
            key,
            canonical,
            key_access,
            payload,
        }
    }

    pub fn body(&self, client: &Client) -> Value {
        json!({
            "keyAccess": self.key_access,
            "policy": self.canonical,
            "clientPublicKey": client.rsa_public_pem(),
        })
    }

    pub fn decrypt(&self, key: &[u8]) -> Vec<u8> {
        aead::decrypt(key, &self.payload).unwrap()
    }
}

/// NanoTDF header with an embedded encrypted policy, bound with ECDSA
pub fn nano_header(data_attributes: &[&str]) -> (NanoTdfHeader, [u8; 32]) {
    let mut builder = PolicyBuilder::new().id(uuid::Uuid::new_v4().to_string());
    for attr in data_attributes {
        builder = builder.attribute_uri(format!("{}/attr/{}", NS, attr)).unwrap();
    }
    let policy_json = builder.build().to_json().unwrap();

    let version = opentdf_kas::nanotdf::VERSION_V12;
    let ephemeral = p256::SecretKey::random(&mut OsRng);
    let object_key = EcdhKem::new(version).derive(&ephemeral, &shared().kas_ec_public).unwrap();
    let sealed = aead::encrypt_with_iv(object_key.as_slice(), &[0u8; 12], policy_json.as_bytes()).unwrap();
    let policy_body = sealed[aead::IV_LEN..].to_vec();
    let policy_binding = sign_ecdsa_p256(&ephemeral, &policy_body).to_vec();

    let mut key = [0u8; 32];
    key.copy_from_slice(object_key.as_slice());
    let header = NanoTdfHeader {
        version,
        kas: ResourceLocator {
            protocol: LocatorProtocol::Https,
            body: "kas.ex.com".to_string(),
            identifier: None,
        },
        binding_mode: BindingMode::Ecdsa,
        payload_config: 0x05,
        policy_kind: PolicyKind::EmbeddedEncrypted,
        policy_body,
        policy_binding,
        ephemeral_key: opentdf_crypto::compressed_point(&ephemeral.public_key()),
    };
    (header, key)
}

pub fn nano_body(header: &NanoTdfHeader, client: &Client) -> Value {
    json!({
        "algorithm": "ec:secp256r1",
        "keyAccess": {
            "type": "wrapped",
            "url": KAS_URL,
            "protocol": "kas",
            "header": BASE64.encode(header.to_bytes()),
        },
        "clientPublicKey": client.ec_public_pem(),
    })
}

/// Registry with the attribute names the scenarios use
pub async fn seeded_registry() -> AttributeRegistry {
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

pub struct Harness {
    pub app: Application,
    pub jwks: Arc<StaticJwksSource>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_builder(|b| b).await
    }

    /// Build with extra configuration applied to the application builder
    pub async fn with_builder(
        configure: impl FnOnce(opentdf_kas::ApplicationBuilder) -> opentdf_kas::ApplicationBuilder,
    ) -> Self {
        let keys = shared();
        let key_master = KeyMaster::load(Some(&keys.kas_rsa_pem), None, Some(&keys.kas_ec_pem), None).unwrap();

        let jwks = Arc::new(StaticJwksSource::new());
        jwks.insert(REALM, issuer_jwks());
        let oidc = OidcVerifier::new(jwks.clone()).with_realm(Some(REALM.to_string()));

        let builder = Application::builder(key_master, oidc)
            .registry(seeded_registry().await)
            .retry(RetryConfig::no_retry(Duration::from_secs(2)))
            .settings(KasSettings {
                audience: AUDIENCE.to_string(),
                ..KasSettings::default()
            });
        Self {
            app: configure(builder).build(),
            jwks,
        }
    }

    pub async fn rewrap(&self, client: &Client, attributes: &[&str], body: &Value) -> Result<RewrapOutcome, KasError> {
        self.app.rewrap(&client.envelope(body), &client.context(attributes)).await
    }
}

/// Entity wrapped key from a JSON rewrap outcome
pub fn entity_wrapped_key(outcome: &RewrapOutcome) -> String {
    match outcome {
        RewrapOutcome::Json(body) => body["entityWrappedKey"].as_str().unwrap().to_string(),
        RewrapOutcome::Signed(_) => panic!("expected a JSON response"),
    }
}

/// Flip one bit of a base64 field
pub fn flip_bit(encoded: &str, byte: usize) -> String {
    flip(encoded, byte, 0)
}

/// Flip `bit` of decoded byte `byte` and re-encode
pub fn flip(encoded: &str, byte: usize, bit: u8) -> String {
    let mut bytes = BASE64.decode(encoded).unwrap();
    bytes[byte] ^= 1 << bit;
    BASE64.encode(bytes)
}
