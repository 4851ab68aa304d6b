//! Prelude
//!
//! Commonly used types for building a key access service on this crate.
//!
//! # Example
//!
//! ```rust
//! use opentdf_authz::prelude::*;
//!
//! # fn example() -> Result<(), KasError> {
//! let policy = PolicyBuilder::new()
//!     .id("3f1c2a9e-5b7d-4e0f-9a61-2c8d7b4e1f30")
//!     .attribute_uri("https://ex.com/attr/Rel/value/USA")?
//!     .build();
//! let canonical = CanonicalPolicy::from_policy(policy)?;
//! assert!(!canonical.raw().is_empty());
//! # Ok(())
//! # }
//! ```

pub use crate::adjudicator::{Adjudicator, Decision, DenyReason};
pub use crate::attribute::{AttributeSet, AttributeValue, Rule, State};
pub use crate::attribute_policy::{AttributePolicyCache, AttributePolicyConfig};
pub use crate::entitlements::EntitlementStore;
pub use crate::entity::{Claims, Entity};
pub use crate::error::KasError;
pub use crate::fqn::AttributeFqn;
pub use crate::key_access::{KeyAccessObject, KeyAccessType, KeyAccessUse};
pub use crate::policy::{CanonicalPolicy, Policy, PolicyBuilder};
pub use crate::registry::AttributeRegistry;
