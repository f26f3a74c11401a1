//! Consumer group behaviour: partition ownership and scale-out

mod common;

use std::collections::HashSet;
use std::time::Duration;

use common::{consumers, publisher, wait_until, GROUP, TOPIC};
use purchase_service::broker::InMemoryBroker;
use purchase_service::store::InMemoryPurchaseStore;
use purchase_service::BuyRequest;

async fn publish_many(broker: &InMemoryBroker, users: usize, per_user: usize) {
    let publisher = publisher(broker);
    for round in 0..per_user {
        for user in 0..users {
            publisher
                .submit(BuyRequest {
                    username: format!("user{}", user),
                    user_id: format!("u{}", user),
                    price: round as f64,
                    timestamp: None,
                })
                .await
                .unwrap();
        }
    }
}

#[tokio::test]
async fn test_workers_own_disjoint_partitions() {
    let broker = InMemoryBroker::new(4);
    let store = InMemoryPurchaseStore::new();
    let pool = consumers(&broker, &store, 2);
    let statuses = pool.statuses();

    publish_many(&broker, 10, 4).await;

    assert!(wait_until(Duration::from_secs(5), || store.len() == 40).await);

    let mut seen = HashSet::new();
    for status in &statuses {
        let assignment = status.snapshot().assignment;
        assert!(!assignment.is_empty());
        for partition in assignment {
            assert!(seen.insert(partition), "partition {} owned twice", partition);
        }
    }
    assert_eq!(seen, (0..4).collect::<HashSet<i32>>());

    let persisted: u64 = statuses.iter().map(|s| s.persisted()).sum();
    assert_eq!(persisted, 40);

    pool.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn test_extra_workers_stay_idle() {
    let broker = InMemoryBroker::new(2);
    let store = InMemoryPurchaseStore::new();
    let pool = consumers(&broker, &store, 3);
    let statuses = pool.statuses();

    publish_many(&broker, 6, 2).await;

    assert!(wait_until(Duration::from_secs(5), || store.len() == 12).await);

    let idle = statuses
        .iter()
        .filter(|s| s.snapshot().assignment.is_empty())
        .count();
    assert_eq!(idle, 1);

    pool.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn test_remaining_worker_takes_over_after_shutdown() {
    let broker = InMemoryBroker::new(2);
    let store = InMemoryPurchaseStore::new();

    let first = consumers(&broker, &store, 1);
    publish_many(&broker, 4, 1).await;
    assert!(wait_until(Duration::from_secs(5), || store.len() == 4).await);
    first.shutdown(Duration::from_secs(2)).await;

    // A new member resumes from the committed offsets, nothing is stored twice
    let second = consumers(&broker, &store, 1);
    publish_many(&broker, 4, 1).await;
    assert!(wait_until(Duration::from_secs(5), || store.len() == 8).await);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(store.len(), 8);

    for partition in 0..2 {
        assert_eq!(
            broker.committed_offset(GROUP, TOPIC, partition).unwrap_or(0),
            broker.log_end_offset(TOPIC, partition)
        );
    }

    second.shutdown(Duration::from_secs(2)).await;
}
