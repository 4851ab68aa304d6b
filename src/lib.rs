pub mod adjudicator;
pub mod attribute;
pub mod attribute_policy;
pub mod entitlements;
pub mod entity;
pub mod error;
pub mod fqn;
pub mod key_access;
pub mod policy;
pub mod prelude;
pub mod registry;
pub mod single_flight;

pub use adjudicator::{Adjudicator, Decision, DenyReason};
pub use attribute::{AttributeCluster, AttributeError, AttributeName, AttributeSet, AttributeValue, Rule, State};
pub use attribute_policy::{
    AttributePolicy, AttributePolicyCache, AttributePolicyConfig, AttributePolicyError, AttributePolicyFetcher,
};
pub use entitlements::{
    EntitlementError, EntitlementListing, EntitlementRepository, EntitlementRow, EntitlementStore,
    InMemoryEntitlementRepository,
};
pub use entity::{Claims, ClaimsError, Entity, EntityAttribute, EntityEntitlements, TdfClaims};
pub use error::{KasError, UNAUTHORIZED_DETAIL};
pub use fqn::{AttributeFqn, FqnError};
pub use key_access::{KeyAccessError, KeyAccessObject, KeyAccessType, KeyAccessUse};
pub use policy::{CanonicalPolicy, Policy, PolicyBody, PolicyBuilder, PolicyError};
pub use registry::{AttributeRegistry, AttributeRepository, InMemoryAttributeRepository, RegistryError};
pub use single_flight::{KeyedGuard, KeyedLocks};
