//! Access decisions over attribute clusters
//!
//! Every cluster of the data attributes is evaluated against the entity's
//! cluster of the same name. Access is granted only when all clusters permit
//! and the dissemination list (if any) names the entity.

use crate::attribute::{AttributeCluster, AttributeSet, Rule};
use crate::attribute_policy::{AttributePolicy, AttributePolicyCache};
use crate::entity::Entity;
use crate::policy::Policy;
use metrics::increment_counter;
use std::fmt;
use tracing::debug;

/// Why a request was denied
///
/// Reasons identify the failing cluster only, never the entity's attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// Entity is not on the dissemination list
    Dissem,
    /// No rule could be loaded for the attribute name
    NoPolicy(String),
    AllOfMiss(String),
    AnyOfMiss(String),
    HierarchyBelow(String),
    /// A data value is absent from its HIERARCHY order
    InvalidAttribute(String),
}

impl DenyReason {
    /// Attribute-name URI of the failing cluster, if any
    pub fn cluster(&self) -> Option<&str> {
        match self {
            DenyReason::Dissem => None,
            DenyReason::NoPolicy(n)
            | DenyReason::AllOfMiss(n)
            | DenyReason::AnyOfMiss(n)
            | DenyReason::HierarchyBelow(n)
            | DenyReason::InvalidAttribute(n) => Some(n),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            DenyReason::Dissem => "dissem-miss",
            DenyReason::NoPolicy(_) => "no-policy",
            DenyReason::AllOfMiss(_) => "allof-miss",
            DenyReason::AnyOfMiss(_) => "anyof-miss",
            DenyReason::HierarchyBelow(_) => "hierarchy-below",
            DenyReason::InvalidAttribute(_) => "invalid-attribute",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cluster() {
            Some(name) => write!(f, "{}: {}", self.code(), name),
            None => f.write_str(self.code()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Permit,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_permit(&self) -> bool {
        matches!(self, Decision::Permit)
    }

    fn label(&self) -> &'static str {
        match self {
            Decision::Permit => "permit",
            Decision::Deny(_) => "deny",
        }
    }
}

/// Evaluates data attribute sets against entity attribute sets
pub struct Adjudicator<'a> {
    policies: &'a AttributePolicyCache,
}

impl<'a> Adjudicator<'a> {
    pub fn new(policies: &'a AttributePolicyCache) -> Self {
        Self { policies }
    }

    /// Full decision for a policy: dissemination first, then attributes
    pub async fn decide(&self, policy: &Policy, entity: &Entity) -> Decision {
        let decision = if !dissem_admits(policy, entity) {
            Decision::Deny(DenyReason::Dissem)
        } else {
            self.evaluate(&policy.data_attribute_set(), &entity.attributes)
                .await
        };

        increment_counter!("kas_adjudications_total", "decision" => decision.label());
        match &decision {
            Decision::Permit => debug!(policy = %policy.uuid, entity = %entity.user_id, "permit"),
            Decision::Deny(reason) => {
                debug!(policy = %policy.uuid, entity = %entity.user_id, reason = %reason, "deny")
            }
        }
        decision
    }

    /// Cluster-by-cluster evaluation; stops at the first failing cluster
    pub async fn evaluate(&self, data: &AttributeSet, entity: &AttributeSet) -> Decision {
        for data_cluster in data.clusters() {
            let name = data_cluster.name_uri();
            let Some(policy) = self.policies.get(name).await else {
                return Decision::Deny(DenyReason::NoPolicy(name.to_string()));
            };
            let entity_cluster = entity.cluster(name);
            if let Err(reason) = evaluate_cluster(&policy, data_cluster, entity_cluster) {
                return Decision::Deny(reason);
            }
        }
        Decision::Permit
    }
}

fn dissem_admits(policy: &Policy, entity: &Entity) -> bool {
    policy.body.dissem.is_empty() || entity.identifiers().any(|id| policy.admits(id))
}

/// Apply one attribute rule to a data cluster and the matching entity cluster
pub fn evaluate_cluster(
    policy: &AttributePolicy,
    data: &AttributeCluster,
    entity: Option<&AttributeCluster>,
) -> Result<(), DenyReason> {
    let name = data.name_uri().to_string();
    let entity_uris = entity.map(AttributeCluster::uris).unwrap_or_default();
    let data_uris = data.uris();

    match policy.rule() {
        Rule::AllOf => {
            if data_uris.is_subset(&entity_uris) {
                Ok(())
            } else {
                Err(DenyReason::AllOfMiss(name))
            }
        }
        Rule::AnyOf => {
            if data_uris.intersection(&entity_uris).next().is_some() {
                Ok(())
            } else {
                Err(DenyReason::AnyOfMiss(name))
            }
        }
        Rule::Hierarchy => {
            let mut tightest = None;
            for value in data.values() {
                let rank = policy
                    .rank(value.value())
                    .ok_or_else(|| DenyReason::InvalidAttribute(name.clone()))?;
                tightest = Some(tightest.map_or(rank, |t: usize| t.min(rank)));
            }
            let Some(required) = tightest else {
                return Ok(());
            };
            let highest = entity.and_then(|c| {
                c.values()
                    .iter()
                    .filter_map(|v| policy.rank(v.value()))
                    .min()
            });
            match highest {
                Some(held) if held <= required => Ok(()),
                _ => Err(DenyReason::HierarchyBelow(name)),
            }
        }
    }
}
