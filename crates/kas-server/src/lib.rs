//! HTTP edge for the OpenTDF Key Access Service
//!
//! Configuration comes from the environment ([`config::KasConfig`]); every
//! route delegates to an [`opentdf_kas::Application`] built at start-up.

pub mod config;
pub mod error;
pub mod routes;
pub mod startup;

pub use config::{ConfigError, DatabaseConfig, KasConfig, KeyConfig, OidcConfig};
pub use error::{ApiError, ErrorBody};
pub use routes::{router, service, AppState};
pub use startup::{build_application, load_attributes};
