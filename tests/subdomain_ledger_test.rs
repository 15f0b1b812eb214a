// Subdomain ledger semantics against the in-memory routing backend:
// claim races, self-healing, and the claim → release → re-claim law.

use std::sync::Arc;

use berthd::deploy::state::DeploymentStatus;
use berthd::routing::memory::MemoryRoutingStore;
use berthd::routing::{RoutingRecord, RoutingStore};
use berthd::subdomain::{self, Availability, ClaimRejection};
use chrono::{Duration, Utc};

async fn seed_record(
    store: &MemoryRoutingStore,
    deployment_id: &str,
    label: &str,
    status: DeploymentStatus,
    age: Duration,
) {
    store.claim_subdomain(label, deployment_id).await.unwrap();
    let mut record = RoutingRecord::new(deployment_id, label);
    record.status = status;
    record.created_at = Utc::now() - age;
    record.updated_at = Utc::now() - age;
    store.create_record(&record).await.unwrap();
}

#[tokio::test]
async fn concurrent_claims_admit_exactly_one_winner() {
    let store = Arc::new(MemoryRoutingStore::new());

    let mut handles = Vec::new();
    for i in 0..16 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            subdomain::claim(store.as_ref(), "shared", &format!("d{i}"))
                .await
                .unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1, "exactly one concurrent claim must win");

    let holder = store.lookup_subdomain("shared").await.unwrap().unwrap();
    assert!(holder.starts_with('d'));
}

#[tokio::test]
async fn reserved_labels_are_never_claimable() {
    let store = MemoryRoutingStore::new();
    for label in ["www", "api", "admin", "berth"] {
        let result = subdomain::claim(&store, label, "d1").await.unwrap();
        assert_eq!(result, Err(ClaimRejection::Reserved), "{label}");
    }
}

#[tokio::test]
async fn live_holder_blocks_claims_with_in_use() {
    let store = MemoryRoutingStore::new();
    seed_record(&store, "d1", "hello", DeploymentStatus::Active, Duration::days(2)).await;

    let result = subdomain::claim(&store, "hello", "d2").await.unwrap();
    assert_eq!(result, Err(ClaimRejection::InUse));
}

#[tokio::test]
async fn stale_holder_reports_releasable_not_claimable() {
    let store = MemoryRoutingStore::new();
    seed_record(&store, "d1", "hello", DeploymentStatus::Failed, Duration::hours(2)).await;

    match subdomain::classify(&store, "hello").await.unwrap() {
        Availability::StaleFailed { deployment_id } => assert_eq!(deployment_id, "d1"),
        other => panic!("expected StaleFailed, got {other:?}"),
    }
    let result = subdomain::claim(&store, "hello", "d2").await.unwrap();
    assert_eq!(result, Err(ClaimRejection::StaleFailed));
}

#[tokio::test]
async fn stuck_pending_deployment_becomes_releasable() {
    let store = MemoryRoutingStore::new();
    seed_record(&store, "d1", "stuck", DeploymentStatus::Pending, Duration::minutes(45)).await;

    match subdomain::classify(&store, "stuck").await.unwrap() {
        Availability::StaleFailed { .. } => {}
        other => panic!("expected StaleFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn dangling_secondary_self_heals() {
    let store = MemoryRoutingStore::new();
    // Secondary points at a deployment with no primary record.
    store.claim_subdomain("ghost", "gone").await.unwrap();

    let availability = subdomain::classify(&store, "ghost").await.unwrap();
    assert_eq!(availability, Availability::Available);
    // The dangling entry was deleted as part of classification.
    assert!(store.lookup_subdomain("ghost").await.unwrap().is_none());

    let result = subdomain::claim(&store, "ghost", "d9").await.unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn release_audits_are_append_only_and_ordered() {
    let store = MemoryRoutingStore::new();
    for (who, reason) in [("u1", "owner_release"), ("u2", "third_party_release")] {
        store
            .append_release_audit(&berthd::routing::ReleaseAudit {
                subdomain: "myapp".into(),
                released_by: who.into(),
                prior_deployment_id: "d1".into(),
                reason: reason.into(),
                at: Utc::now(),
            })
            .await
            .unwrap();
    }

    let audits = store.release_audits();
    assert_eq!(audits.len(), 2);
    assert_eq!(audits[0].released_by, "u1");
    assert_eq!(audits[1].reason, "third_party_release");
}

#[tokio::test]
async fn release_then_reclaim_succeeds_immediately() {
    let store = MemoryRoutingStore::new();
    seed_record(&store, "d1", "myapp", DeploymentStatus::Failed, Duration::hours(30)).await;

    // Owner-release path at the store level: drop both keys.
    store.release_subdomain("myapp").await.unwrap();
    store.delete_record("d1").await.unwrap();

    let result = subdomain::claim(&store, "myapp", "d2").await.unwrap();
    assert!(result.is_ok());
    assert_eq!(
        store.lookup_subdomain("myapp").await.unwrap().as_deref(),
        Some("d2")
    );
}
