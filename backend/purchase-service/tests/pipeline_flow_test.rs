//! End-to-end flow over the in-memory broker and store:
//! submit → publish → consume → persist → query

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{consumers, publisher, wait_until, GROUP, TOPIC};
use event_schema::EventType;
use purchase_service::broker::InMemoryBroker;
use purchase_service::consumer::WorkerState;
use purchase_service::health::StoreHealthCheck;
use purchase_service::store::InMemoryPurchaseStore;
use purchase_service::{BuyRequest, ComponentStatus, HealthMonitor, QueryService};

fn buy(user_id: &str, username: &str, price: f64) -> BuyRequest {
    BuyRequest {
        username: username.to_string(),
        user_id: user_id.to_string(),
        price,
        timestamp: None,
    }
}

fn query(store: &InMemoryPurchaseStore) -> QueryService {
    QueryService::new(Arc::new(store.clone()), 100, 1000)
}

#[tokio::test]
async fn test_submitted_purchase_becomes_queryable() {
    let broker = InMemoryBroker::new(3);
    let store = InMemoryPurchaseStore::new();
    let pool = consumers(&broker, &store, 1);
    let publisher = publisher(&broker);

    let (event, ack) = publisher.submit(buy("u1", "jdoe", 9.99)).await.unwrap();
    assert_eq!(ack.partition, broker.partition_for(b"u1"));
    assert_eq!(ack.attempts, 1);

    assert!(wait_until(Duration::from_secs(5), || {
        broker.committed_offset(GROUP, TOPIC, ack.partition) == Some(ack.offset + 1)
    })
    .await);
    assert_eq!(store.len(), 1);

    let purchases = query(&store).get_by_user("u1").await.unwrap();
    assert_eq!(purchases.len(), 1);
    assert_eq!(purchases[0].user_id, "u1");
    assert_eq!(purchases[0].username, "jdoe");
    assert_eq!(purchases[0].price, 9.99);
    assert_eq!(purchases[0].timestamp, event.timestamp());
    assert_eq!(purchases[0].event_type, EventType::PurchaseRequest);

    let unknown = query(&store).get_by_user("nobody").await.unwrap();
    assert!(unknown.is_empty());

    pool.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn test_purchases_of_one_user_keep_submission_order() {
    let broker = InMemoryBroker::new(4);
    let store = InMemoryPurchaseStore::new();
    let pool = consumers(&broker, &store, 2);
    let publisher = publisher(&broker);

    for i in 1..=5 {
        publisher.submit(buy("u7", "ann", i as f64)).await.unwrap();
        publisher.submit(buy("u8", "bob", 100.0 + i as f64)).await.unwrap();
    }

    assert!(wait_until(Duration::from_secs(5), || store.len() == 10).await);

    let prices: Vec<f64> = query(&store)
        .get_by_user("u7")
        .await
        .unwrap()
        .iter()
        .map(|p| p.price)
        .collect();
    assert_eq!(prices, vec![1.0, 2.0, 3.0, 4.0, 5.0]);

    let recent = query(&store).get_recent(Some(3)).await.unwrap();
    assert_eq!(recent.len(), 3);
    assert!(recent[0].created_at >= recent[1].created_at);

    pool.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn test_malformed_message_does_not_block_the_partition() {
    let broker = InMemoryBroker::new(1);
    let store = InMemoryPurchaseStore::new();
    let publisher = publisher(&broker);

    publisher.submit(buy("u2", "carl", 1.0)).await.unwrap();
    broker.append_raw(TOPIC, Some(b"u2"), Some(b"{not json"));
    broker.append_raw(TOPIC, Some(b"u2"), None);
    publisher.submit(buy("u2", "carl", 2.0)).await.unwrap();

    let pool = consumers(&broker, &store, 1);
    let statuses = pool.statuses();

    assert!(wait_until(Duration::from_secs(5), || {
        broker.committed_offset(GROUP, TOPIC, 0) == Some(4)
    })
    .await);

    assert_eq!(store.len(), 2);
    assert_eq!(statuses[0].persisted(), 2);
    assert_eq!(statuses[0].skipped(), 2);

    pool.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn test_store_outage_pauses_without_committing_then_recovers() {
    let broker = InMemoryBroker::new(1);
    let store = InMemoryPurchaseStore::new();
    let health = HealthMonitor::new(Duration::from_millis(500))
        .with_store(Arc::new(StoreHealthCheck::new(Arc::new(store.clone()))));
    let publisher = publisher(&broker);

    let report = health.report().await;
    assert_eq!(report.store.map(|s| s.status), Some(ComponentStatus::Ok));

    store.set_available(false);
    let report = health.report().await;
    assert_eq!(report.overall, ComponentStatus::Down);
    assert_eq!(report.store.map(|s| s.status), Some(ComponentStatus::Down));

    let pool = consumers(&broker, &store, 1);
    let statuses = pool.statuses();
    publisher.submit(buy("u3", "dana", 5.0)).await.unwrap();

    // Several full retry rounds fail while the store is down
    assert!(wait_until(Duration::from_secs(5), || store.insert_attempts() >= 6).await);
    assert!(store.is_empty());
    assert_eq!(broker.committed_offset(GROUP, TOPIC, 0), None);
    assert!(statuses[0].is_paused());
    assert!(statuses[0].snapshot().last_error.is_some());

    store.set_available(true);
    assert!(wait_until(Duration::from_secs(5), || {
        broker.committed_offset(GROUP, TOPIC, 0) == Some(1)
    })
    .await);

    assert_eq!(store.len(), 1);
    assert!(!statuses[0].is_paused());

    let report = health.report().await;
    assert_eq!(report.overall, ComponentStatus::Ok);

    pool.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn test_shutdown_stops_every_worker() {
    let broker = InMemoryBroker::new(2);
    let store = InMemoryPurchaseStore::new();
    let pool = consumers(&broker, &store, 2);
    let statuses = pool.statuses();

    assert!(wait_until(Duration::from_secs(2), || {
        statuses.iter().all(|s| s.state() == WorkerState::Polling)
    })
    .await);

    pool.shutdown(Duration::from_secs(2)).await;

    for status in &statuses {
        assert_eq!(status.state(), WorkerState::Stopped);
    }
}
