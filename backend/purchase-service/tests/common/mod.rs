//! Shared helpers for the purchase pipeline integration tests
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use purchase_service::broker::{EventSource, InMemoryBroker};
use purchase_service::consumer::WorkerConfig;
use purchase_service::store::{InMemoryPurchaseStore, PurchaseStore};
use purchase_service::{ConsumerPool, Publisher, PublisherConfig};
use resilience::RetryConfig;

pub const TOPIC: &str = "purchase-events";
pub const GROUP: &str = "customer-management-api";

pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 2,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(10),
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

pub fn fast_worker_config() -> WorkerConfig {
    WorkerConfig {
        poll_timeout: Duration::from_millis(20),
        drain_timeout: Duration::from_millis(500),
        write_timeout: Duration::from_millis(200),
        store_retry: fast_retry(),
        pause_backoff: fast_retry(),
    }
}

pub fn publisher(broker: &InMemoryBroker) -> Arc<Publisher> {
    Arc::new(Publisher::new(
        Arc::new(broker.clone()),
        PublisherConfig {
            topic: TOPIC.to_string(),
            send_timeout: Duration::from_millis(100),
            retry: fast_retry(),
        },
    ))
}

pub fn consumers(broker: &InMemoryBroker, store: &InMemoryPurchaseStore, workers: usize) -> ConsumerPool {
    let store: Arc<dyn PurchaseStore> = Arc::new(store.clone());
    ConsumerPool::spawn(workers, store, fast_worker_config(), |_| {
        Ok(Box::new(broker.subscribe(GROUP, TOPIC)) as Box<dyn EventSource>)
    })
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
