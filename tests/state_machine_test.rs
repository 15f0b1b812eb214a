// Deployment state transitions over the routing store: linearized
// version-checked updates, duplicate-event absorption, and observed-state
// monotonicity.

use berthd::deploy::state::{apply_build_event, Advance, BuildEventStatus, DeploymentStatus};
use berthd::routing::memory::MemoryRoutingStore;
use berthd::routing::{self, RoutingRecord, RoutingStore};

async fn seed(store: &MemoryRoutingStore, status: DeploymentStatus) {
    let mut record = RoutingRecord::new("d1", "hello");
    record.status = status;
    store.create_record(&record).await.unwrap();
}

/// Apply a build event the way the webhook reconciler does: the pure
/// transition function decides, the store linearizes.
async fn deliver(store: &MemoryRoutingStore, event: BuildEventStatus) -> DeploymentStatus {
    let updated = routing::update_record(store, "d1", |current| {
        match apply_build_event(current.status, event) {
            Advance::To(status) => {
                let mut next = current.clone();
                next.status = status;
                Some(next)
            }
            Advance::Fail(message) => {
                let mut next = current.clone();
                next.status = DeploymentStatus::Failed;
                next.error = Some(message);
                Some(next)
            }
            Advance::Noop | Advance::Discard => None,
        }
    })
    .await
    .unwrap()
    .expect("record exists");
    updated.status
}

#[tokio::test]
async fn success_then_duplicate_success_is_a_noop() {
    let store = MemoryRoutingStore::new();
    seed(&store, DeploymentStatus::Building).await;

    assert_eq!(
        deliver(&store, BuildEventStatus::Success).await,
        DeploymentStatus::Deploying
    );
    // Second delivery of the same event: state does not move.
    assert_eq!(
        deliver(&store, BuildEventStatus::Success).await,
        DeploymentStatus::Deploying
    );
}

#[tokio::test]
async fn failure_class_terminates_and_records_reason() {
    let store = MemoryRoutingStore::new();
    seed(&store, DeploymentStatus::Building).await;

    assert_eq!(
        deliver(&store, BuildEventStatus::Timeout).await,
        DeploymentStatus::Failed
    );
    let record = store.get_record("d1").await.unwrap().unwrap();
    assert!(record.error.unwrap().contains("TIMEOUT"));
}

#[tokio::test]
async fn events_after_terminal_state_are_discarded() {
    let store = MemoryRoutingStore::new();
    seed(&store, DeploymentStatus::Failed).await;

    assert_eq!(
        deliver(&store, BuildEventStatus::Success).await,
        DeploymentStatus::Failed
    );
}

#[tokio::test]
async fn observed_state_never_moves_backward() {
    let store = MemoryRoutingStore::new();
    seed(&store, DeploymentStatus::Pending).await;

    // A deliberately shuffled event stream with duplicates.
    let events = [
        BuildEventStatus::Working,
        BuildEventStatus::Queued,
        BuildEventStatus::Success,
        BuildEventStatus::Working,
        BuildEventStatus::Success,
    ];

    let mut last_rank = 0u8;
    for event in events {
        let status = deliver(&store, event).await;
        let rank = match status {
            DeploymentStatus::Pending => 0,
            DeploymentStatus::Uploading => 1,
            DeploymentStatus::Analyzing => 2,
            DeploymentStatus::Building => 3,
            DeploymentStatus::Deploying => 4,
            DeploymentStatus::Active => 5,
            DeploymentStatus::Failed | DeploymentStatus::Expired => 6,
        };
        assert!(rank >= last_rank, "state moved backward to {status}");
        last_rank = rank;
    }
    assert_eq!(last_rank, 4, "stream should settle at deploying");
}

#[tokio::test]
async fn version_counter_increments_on_every_applied_transition() {
    let store = MemoryRoutingStore::new();
    seed(&store, DeploymentStatus::Pending).await;

    deliver(&store, BuildEventStatus::Working).await;
    deliver(&store, BuildEventStatus::Success).await;
    // Noop delivery must not bump the version.
    deliver(&store, BuildEventStatus::Success).await;

    let record = store.get_record("d1").await.unwrap().unwrap();
    assert_eq!(record.version, 3);
}

#[tokio::test]
async fn contending_writers_linearize() {
    let store = std::sync::Arc::new(MemoryRoutingStore::new());
    seed(&store, DeploymentStatus::Building).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            deliver(&store, BuildEventStatus::Success).await
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), DeploymentStatus::Deploying);
    }

    let record = store.get_record("d1").await.unwrap().unwrap();
    // Exactly one writer advanced building → deploying.
    assert_eq!(record.version, 2);
}
