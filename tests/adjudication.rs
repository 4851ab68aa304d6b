mod common;

use common::*;
use opentdf_authz::{Adjudicator, CanonicalPolicy, Decision, DenyReason, KasError};
use std::sync::atomic::Ordering;

async fn decide(data: &[&str], dissem: &[&str], entity_id: &str, held: &[&str]) -> Decision {
    let (cache, _) = cache().await;
    Adjudicator::new(&cache)
        .decide(&policy(data, dissem), &entity(entity_id, held))
        .await
}

#[tokio::test]
async fn test_all_of_requires_every_value() {
    let data = ["Classification/value/S", "COI/value/PRX"];
    assert_eq!(
        decide(&data, &[], "alice", &["Classification/value/S", "COI/value/PRX", "COI/value/OTHER"]).await,
        Decision::Permit
    );
    assert_eq!(
        decide(&data, &[], "alice", &["Classification/value/S", "COI/value/OTHER"]).await,
        Decision::Deny(DenyReason::AllOfMiss(uri("COI")))
    );
}

#[tokio::test]
async fn test_any_of_needs_one_value() {
    let data = ["Rel/value/USA", "Rel/value/GBR"];
    assert!(decide(&data, &[], "alice", &["Rel/value/USA"]).await.is_permit());

    let denied = decide(&data, &[], "alice", &["Rel/value/CAN"]).await;
    let Decision::Deny(reason) = denied else {
        panic!("expected a denial");
    };
    let err: KasError = reason.into();
    assert_eq!(err.status(), 403);
    assert_eq!(err.detail(), "anyof-miss: https://ex.com/attr/Rel");
}

#[tokio::test]
async fn test_hierarchy_ranks() {
    let data = ["Class/value/S"];
    assert!(decide(&data, &[], "alice", &["Class/value/TS"]).await.is_permit());
    assert!(decide(&data, &[], "alice", &["Class/value/S"]).await.is_permit());
    assert_eq!(
        decide(&data, &[], "alice", &["Class/value/C"]).await,
        Decision::Deny(DenyReason::HierarchyBelow(uri("Class")))
    );
    assert_eq!(
        decide(&data, &[], "alice", &[]).await,
        Decision::Deny(DenyReason::HierarchyBelow(uri("Class")))
    );
}

#[tokio::test]
async fn test_every_cluster_must_pass() {
    let data = ["Rel/value/USA", "Class/value/C"];
    assert!(decide(&data, &[], "alice", &["Rel/value/USA", "Class/value/S"]).await.is_permit());
    assert!(!decide(&data, &[], "alice", &["Rel/value/USA", "Class/value/U"]).await.is_permit());
    assert!(!decide(&data, &[], "alice", &["Rel/value/GBR", "Class/value/TS"]).await.is_permit());
}

#[tokio::test]
async fn test_dissemination_checked_first() {
    let data = ["Rel/value/USA"];
    assert!(decide(&data, &["alice"], "alice", &["Rel/value/USA"]).await.is_permit());
    assert_eq!(
        decide(&data, &["alice"], "bob", &["Rel/value/USA"]).await,
        Decision::Deny(DenyReason::Dissem)
    );
    assert!(decide(&data, &[], "bob", &["Rel/value/USA"]).await.is_permit());
}

#[tokio::test]
async fn test_unregistered_name_is_denied() {
    assert_eq!(
        decide(&["Other/value/x"], &[], "alice", &["Other/value/x"]).await,
        Decision::Deny(DenyReason::NoPolicy(uri("Other")))
    );
}

#[tokio::test]
async fn test_policy_without_attributes_permits() {
    assert!(decide(&[], &[], "alice", &[]).await.is_permit());
}

#[tokio::test]
async fn test_rules_fetched_once_per_name() {
    let (cache, fetcher) = cache().await;
    let adjudicator = Adjudicator::new(&cache);
    let policy = policy(&["Rel/value/USA"], &[]);
    for _ in 0..3 {
        assert!(adjudicator
            .decide(&policy, &entity("alice", &["Rel/value/USA"]))
            .await
            .is_permit());
    }
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_canonical_policy_roundtrips_into_decision() {
    let (cache, _) = cache().await;
    let canonical = CanonicalPolicy::from_policy(policy(&["Rel/value/GBR"], &[])).unwrap();
    let parsed = CanonicalPolicy::parse(canonical.raw()).unwrap();
    assert_eq!(parsed.binding_bytes(), canonical.binding_bytes());
    assert!(Adjudicator::new(&cache)
        .decide(parsed.policy(), &entity("alice", &["Rel/value/GBR"]))
        .await
        .is_permit());
}
