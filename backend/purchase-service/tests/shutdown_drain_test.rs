//! Shutdown while a write is in flight: the write either lands and is committed within the
//! drain budget, or its offset stays uncommitted and the next member re-delivers it.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{consumers, fast_worker_config, publisher, wait_until, GROUP, TOPIC};
use purchase_service::broker::{EventSource, InMemoryBroker};
use purchase_service::consumer::{WorkerConfig, WorkerState};
use purchase_service::store::{InMemoryPurchaseStore, PurchaseStore};
use purchase_service::{BuyRequest, ConsumerPool};

fn buy(user_id: &str, price: f64) -> BuyRequest {
    BuyRequest {
        username: "jdoe".to_string(),
        user_id: user_id.to_string(),
        price,
        timestamp: None,
    }
}

fn pool_with(broker: &InMemoryBroker, store: &InMemoryPurchaseStore, config: WorkerConfig) -> ConsumerPool {
    let store: Arc<dyn PurchaseStore> = Arc::new(store.clone());
    ConsumerPool::spawn(1, store, config, |_| {
        Ok(Box::new(broker.subscribe(GROUP, TOPIC)) as Box<dyn EventSource>)
    })
}

#[tokio::test]
async fn test_shutdown_mid_write_finishes_and_commits() {
    let broker = InMemoryBroker::new(1);
    let store = InMemoryPurchaseStore::new();
    store.set_insert_delay(Duration::from_millis(150));

    let pool = pool_with(&broker, &store, fast_worker_config());
    let statuses = pool.statuses();
    let (_, ack) = publisher(&broker).submit(buy("u1", 4.5)).await.unwrap();

    assert!(wait_until(Duration::from_secs(5), || store.insert_attempts() >= 1).await);
    assert!(store.is_empty());
    assert_eq!(broker.committed_offset(GROUP, TOPIC, ack.partition), None);

    pool.shutdown(Duration::from_secs(2)).await;

    assert_eq!(store.len(), 1);
    assert_eq!(
        broker.committed_offset(GROUP, TOPIC, ack.partition),
        Some(ack.offset + 1)
    );
    assert_eq!(statuses[0].state(), WorkerState::Stopped);
    assert_eq!(statuses[0].persisted(), 1);
}

#[tokio::test]
async fn test_write_outlasting_drain_is_redelivered() {
    let broker = InMemoryBroker::new(1);
    let store = InMemoryPurchaseStore::new();
    store.set_insert_delay(Duration::from_secs(2));

    let slow = WorkerConfig {
        drain_timeout: Duration::from_millis(100),
        write_timeout: Duration::from_secs(5),
        ..fast_worker_config()
    };
    let pool = pool_with(&broker, &store, slow);
    let statuses = pool.statuses();
    let (_, ack) = publisher(&broker).submit(buy("u1", 7.0)).await.unwrap();

    assert!(wait_until(Duration::from_secs(5), || store.insert_attempts() >= 1).await);
    pool.shutdown(Duration::from_secs(1)).await;

    assert!(store.is_empty());
    assert_eq!(broker.committed_offset(GROUP, TOPIC, ack.partition), None);
    assert_eq!(statuses[0].state(), WorkerState::Stopped);

    // The next member of the group starts from the last commit
    store.set_insert_delay(Duration::ZERO);
    let next = consumers(&broker, &store, 1);

    assert!(wait_until(Duration::from_secs(5), || {
        broker.committed_offset(GROUP, TOPIC, ack.partition) == Some(ack.offset + 1)
    })
    .await);
    assert_eq!(store.len(), 1);
    assert_eq!(store.insert_attempts(), 2);

    next.shutdown(Duration::from_secs(2)).await;
}
