//! OpenTDF Key Access Service
//!
//! The service side of the key access protocol:
//! - KAS key management (RSA-2048 for `wrapped` KAOs, P-256 for NanoTDF)
//! - OIDC access token and signed request envelope verification
//! - The rewrap pipeline: binding check, plugins, adjudication, rewrap
//! - Policy upsert through plugins
//! - Bounded retries for outbound calls
//!
//! # Example
//!
//! ```
//! use opentdf_kas::{Application, KeyMaster, OidcVerifier, StaticJwksSource};
//! use std::sync::Arc;
//!
//! # fn example() -> Result<(), opentdf_kas::KeyMasterError> {
//! let oidc = OidcVerifier::new(Arc::new(StaticJwksSource::new()));
//! let app = Application::builder(KeyMaster::generate()?, oidc).build();
//! assert!(app.key_master.is_ready());
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod error;
pub mod key_master;
pub mod nanotdf;
pub mod oidc;
pub mod plugins;
pub mod retry;
pub mod rewrap;
pub mod upsert;

pub use app::{Application, ApplicationBuilder, KasSettings, RequestContext, SignedRequestEnvelope};
pub use error::{KeyMasterError, NanoTdfError, OidcError, PluginError};
pub use key_master::{KeyKind, KeyMaster, PrivateKeyMaterial, PublicKeyMaterial};
pub use nanotdf::{BindingMode, LocatorProtocol, NanoTdfHeader, PolicyKind, ResourceLocator};
pub use oidc::{
    verify_request_token, AccessToken, HttpJwksSource, JwksCache, JwksSource, OidcVerifier, StaticJwksSource,
};
pub use plugins::{
    PluginAttributeFetcher, PluginRunner, PolicyLedgerUpsertPlugin, RegistryAttributePlugin, RewrapPlugin,
    RewrapRequest, RewrapResponse, RewrapVerdict, UpsertPlugin, UpsertRequest, UpsertVerdict,
};
pub use retry::{RetryConfig, RetryableError};
pub use rewrap::RewrapOutcome;

pub use opentdf_authz;
pub use opentdf_crypto;
