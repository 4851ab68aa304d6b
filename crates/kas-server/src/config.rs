//! Environment configuration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
pub const DEFAULT_LEEWAY_SECS: u64 = 30;
pub const MAX_LEEWAY_SECS: u64 = 120;
pub const DEFAULT_JWKS_TTL_SECS: u64 = 300;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("{var}: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error("KAS keys: {0}")]
    Keys(#[from] opentdf_kas::KeyMasterError),

    #[error("attributes file {path}: {reason}")]
    Attributes { path: String, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OidcConfig {
    pub server_url: String,
    pub realm: Option<String>,
    pub client_id: Option<String>,
    /// Audience for the entitlement routes
    pub audience: String,
}

/// PEM blobs or paths for the KAS keys
#[derive(Clone, Default, PartialEq, Eq)]
pub struct KeyConfig {
    pub rsa_private: Option<String>,
    pub rsa_certificate: Option<String>,
    pub ec_private: Option<String>,
    pub ec_certificate: Option<String>,
}

impl KeyConfig {
    pub fn is_empty(&self) -> bool {
        self.rsa_private.is_none() && self.ec_private.is_none()
    }
}

impl std::fmt::Debug for KeyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyConfig")
            .field("rsa_private", &self.rsa_private.as_ref().map(|_| "<redacted>"))
            .field("rsa_certificate", &self.rsa_certificate.is_some())
            .field("ec_private", &self.ec_private.as_ref().map(|_| "<redacted>"))
            .field("ec_certificate", &self.ec_certificate.is_some())
            .finish()
    }
}

/// Postgres settings; only reported, the repositories are in-memory
#[derive(Clone, Default, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub schema: Option<String>,
}

impl DatabaseConfig {
    pub fn is_configured(&self) -> bool {
        self.host.is_some()
    }
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("database", &self.database)
            .field("schema", &self.schema)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct KasConfig {
    pub bind_addr: SocketAddr,
    /// Prefix every route is nested under, e.g. `/api/kas`
    pub root_path: Option<String>,
    pub cors_origins: Vec<String>,
    pub oidc: OidcConfig,
    pub keys: KeyConfig,
    pub jwt_leeway: u64,
    pub jwks_ttl: Duration,
    pub fetch_timeout: Duration,
    pub database: DatabaseConfig,
    /// JSON list of `{authorityNamespace, name, rule?, order?}` seeding the registry
    pub attributes_file: Option<PathBuf>,
}

impl KasConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source; blank values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind_addr = get("SERVER_BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                var: "SERVER_BIND_ADDR",
                reason: e.to_string(),
            })?;

        let root_path = get("SERVER_ROOT_PATH")
            .map(|p| format!("/{}", p.trim_matches('/')))
            .filter(|p| p != "/");

        let cors_origins = get("SERVER_CORS_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let oidc = OidcConfig {
            server_url: get("OIDC_SERVER_URL")
                .ok_or(ConfigError::Missing("OIDC_SERVER_URL"))?
                .trim_end_matches('/')
                .to_string(),
            realm: get("OIDC_REALM"),
            client_id: get("OIDC_CLIENT_ID"),
            audience: get("OIDC_AUDIENCE").unwrap_or_else(|| opentdf_kas::app::DEFAULT_ENTITLEMENT_AUDIENCE.to_string()),
        };

        let keys = KeyConfig {
            rsa_private: get("KAS_PRIVATE_KEY"),
            rsa_certificate: get("KAS_CERTIFICATE"),
            ec_private: get("KAS_EC_SECP256R1_PRIVATE_KEY"),
            ec_certificate: get("KAS_EC_SECP256R1_CERTIFICATE"),
        };

        let jwt_leeway = parse_secs(&get, "KAS_JWT_LEEWAY", DEFAULT_LEEWAY_SECS)?;
        if jwt_leeway > MAX_LEEWAY_SECS {
            return Err(ConfigError::Invalid {
                var: "KAS_JWT_LEEWAY",
                reason: format!("must be at most {} seconds", MAX_LEEWAY_SECS),
            });
        }
        let jwks_ttl = Duration::from_secs(parse_secs(&get, "KAS_JWKS_TTL", DEFAULT_JWKS_TTL_SECS)?);
        let fetch_timeout = Duration::from_secs(parse_secs(&get, "KAS_FETCH_TIMEOUT", DEFAULT_FETCH_TIMEOUT_SECS)?);

        let database = DatabaseConfig {
            host: get("POSTGRES_HOST"),
            port: get("POSTGRES_PORT")
                .map(|p| {
                    p.parse().map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
                        var: "POSTGRES_PORT",
                        reason: e.to_string(),
                    })
                })
                .transpose()?,
            user: get("POSTGRES_USER"),
            password: get("POSTGRES_PASSWORD"),
            database: get("POSTGRES_DATABASE"),
            schema: get("POSTGRES_SCHEMA"),
        };

        Ok(Self {
            bind_addr,
            root_path,
            cors_origins,
            oidc,
            keys,
            jwt_leeway,
            jwks_ttl,
            fetch_timeout,
            database,
            attributes_file: get("KAS_ATTRIBUTES_FILE").map(PathBuf::from),
        })
    }

    /// Audience required on rewrap and upsert tokens
    pub fn rewrap_audience(&self) -> String {
        self.oidc
            .client_id
            .clone()
            .unwrap_or_else(|| opentdf_kas::KasSettings::default().audience)
    }
}

fn parse_secs<G>(get: &G, var: &'static str, default: u64) -> Result<u64, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(v) => v.parse().map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
            var,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}
