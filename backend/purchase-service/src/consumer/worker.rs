//! Consumer worker: poll → decode → write-through → commit
//!
//! Offsets advance only after the store confirmed the write (or after a malformed message
//! was deliberately skipped), so a crash between write and commit re-delivers the message.
//! When the store stays unavailable for a whole retry round the worker rewinds the
//! partition to the failed message and pauses with a capped, growing cooldown.
use event_schema::PurchaseEvent;
use resilience::{with_retry_if, with_timeout_result, Backoff, RetryConfig, RetryError, TimeoutError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::status::{ConsumerStatus, WorkerState};
use crate::broker::{BrokerRecord, EventSource};
use crate::store::{PurchaseStore, StoreError};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub poll_timeout: Duration,
    /// Bound on finishing the in-flight message after shutdown was requested
    pub drain_timeout: Duration,
    /// Per-attempt insert timeout
    pub write_timeout: Duration,
    /// One retry round for a transient store failure
    pub store_retry: RetryConfig,
    /// Cooldown between rounds while the store stays down
    pub pause_backoff: RetryConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let write = resilience::store_write_config();
        let store_retry = write.retry.unwrap_or_default();

        Self {
            poll_timeout: Duration::from_secs(1),
            drain_timeout: Duration::from_secs(10),
            write_timeout: write.timeout.duration,
            pause_backoff: RetryConfig {
                initial_backoff: Duration::from_secs(1),
                ..store_retry.clone()
            },
            store_retry,
        }
    }
}

/// What happened to one polled message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Written and committed
    Persisted,
    /// Malformed, committed without a write
    Skipped,
    /// Refused by the store, committed without a write
    Rejected,
    /// Store unavailable for a whole retry round; partition rewound
    Paused,
    /// Higher offset of a rewound partition, dropped until the rewound message returns
    Discarded,
}

pub struct ConsumerWorker {
    id: usize,
    source: Box<dyn EventSource>,
    store: Arc<dyn PurchaseStore>,
    status: Arc<ConsumerStatus>,
    config: WorkerConfig,
    shutdown_rx: watch::Receiver<bool>,
    /// Partition → offset the partition was rewound to
    rewound: HashMap<i32, i64>,
    /// Source generation the rewinds above belong to
    generation: u64,
    pause: Backoff,
}

impl ConsumerWorker {
    pub fn new(
        id: usize,
        source: Box<dyn EventSource>,
        store: Arc<dyn PurchaseStore>,
        status: Arc<ConsumerStatus>,
        config: WorkerConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let pause = Backoff::new(config.pause_backoff.clone());
        Self {
            id,
            source,
            store,
            status,
            config,
            shutdown_rx,
            rewound: HashMap::new(),
            generation: 0,
            pause,
        }
    }

    pub fn status(&self) -> Arc<ConsumerStatus> {
        self.status.clone()
    }

    /// Run the consumer loop until shutdown is requested
    pub async fn run(mut self) {
        let mut shutdown_rx = self.shutdown_rx.clone();

        info!(worker = self.id, "Starting purchase consumer loop");
        self.status.set_state(WorkerState::JoiningGroup);

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let polled = tokio::select! {
                _ = shutdown_requested(&mut shutdown_rx) => break,
                polled = self.source.poll(self.config.poll_timeout) => polled,
            };

            self.status.set_assignment(self.source.assignment());

            let record = match polled {
                Ok(Some(record)) => record,
                Ok(None) => {
                    self.status.set_state(WorkerState::Polling);
                    self.status.mark_idle_poll();
                    continue;
                }
                Err(e) => {
                    // Broker errors never end the loop
                    error!(worker = self.id, error = %e, "Kafka consumer error");
                    self.status.record_error(e.to_string());
                    tokio::time::sleep(self.config.poll_timeout.min(Duration::from_secs(1))).await;
                    continue;
                }
            };

            let worker_id = self.id;
            let drain_timeout = self.config.drain_timeout;

            let outcome = {
                let process = self.process(record);
                tokio::pin!(process);

                let finished = tokio::select! {
                    outcome = &mut process => Some(outcome),
                    _ = shutdown_requested(&mut shutdown_rx) => None,
                };

                match finished {
                    Some(outcome) => outcome,
                    None => {
                        info!(worker = worker_id, "Shutdown requested, draining in-flight message");
                        match tokio::time::timeout(drain_timeout, process).await {
                            Ok(outcome) => debug!(?outcome, "In-flight message drained"),
                            Err(_) => warn!(
                                ?drain_timeout,
                                "Drain timeout elapsed, leaving offset uncommitted"
                            ),
                        }
                        break;
                    }
                }
            };

            if outcome == Outcome::Paused {
                let delay = self.pause.next_delay();
                warn!(worker = self.id, cooldown = ?delay, "Store unavailable, partition paused");

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown_requested(&mut shutdown_rx) => break,
                }
            } else if outcome != Outcome::Discarded {
                self.pause.reset();
                self.status.set_state(WorkerState::Polling);
            }
        }

        self.status.set_state(WorkerState::Draining);
        if let Err(e) = self.source.close().await {
            warn!(worker = self.id, error = %e, "Failed to leave consumer group cleanly");
        }
        self.status.set_state(WorkerState::Stopped);

        info!(
            worker = self.id,
            persisted = self.status.persisted(),
            skipped = self.status.skipped(),
            rejected = self.status.rejected(),
            "Purchase consumer stopped"
        );
    }

    /// Handle one message inside its own error boundary
    pub async fn process(&mut self, record: BrokerRecord) -> Outcome {
        self.forget_stale_rewinds();

        if let Some(&rewound_to) = self.rewound.get(&record.partition) {
            if record.offset > rewound_to {
                debug!(
                    partition = record.partition,
                    offset = record.offset,
                    rewound_to,
                    "Dropping prefetched message of rewound partition"
                );
                return Outcome::Discarded;
            }
            self.rewound.remove(&record.partition);
        }

        self.status.set_state(WorkerState::Processing);

        let payload = record.payload.as_deref().unwrap_or_default();
        let event = match PurchaseEvent::decode(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    partition = record.partition,
                    offset = record.offset,
                    error = %e,
                    "Malformed purchase event, skipping"
                );
                self.commit(&record).await;
                self.status.mark_skipped();
                return Outcome::Skipped;
            }
        };

        match self.write(&event).await {
            Ok(stored) => {
                debug!(
                    user_id = %stored.user_id,
                    purchase_id = %stored.id,
                    partition = record.partition,
                    offset = record.offset,
                    "Purchase stored"
                );
                self.status.mark_persisted();
                self.commit(&record).await;
                Outcome::Persisted
            }
            Err(RetryError::MaxRetriesExceeded { retries, last_error }) => {
                warn!(
                    partition = record.partition,
                    offset = record.offset,
                    retries,
                    error = %last_error,
                    "Store write failed for a whole retry round"
                );
                self.status.record_error(last_error.to_string());
                self.status.set_state(WorkerState::PausedOnStoreFailure);

                if let Err(e) = self.source.rewind(&record).await {
                    // The partition was revoked; its new owner resumes from the last commit
                    warn!(partition = record.partition, error = %e, "Failed to rewind partition");
                } else {
                    self.rewound.insert(record.partition, record.offset);
                }
                Outcome::Paused
            }
            Err(RetryError::OperationFailed(e)) => {
                error!(
                    user_id = %event.user_id(),
                    partition = record.partition,
                    offset = record.offset,
                    error = %e,
                    "Store rejected purchase, skipping"
                );
                self.commit(&record).await;
                self.status.mark_rejected();
                Outcome::Rejected
            }
        }
    }

    /// A rebalance restarts every assigned partition from its committed offset, and another
    /// member may have committed past a rewind in between.
    fn forget_stale_rewinds(&mut self) {
        let generation = self.source.generation();
        if generation == self.generation {
            return;
        }
        if !self.rewound.is_empty() {
            debug!(
                worker = self.id,
                generation,
                partitions = ?self.rewound.keys().collect::<Vec<_>>(),
                "Assignment changed, dropping pending rewinds"
            );
            self.rewound.clear();
        }
        self.generation = generation;
    }

    async fn write(
        &self,
        event: &PurchaseEvent,
    ) -> Result<event_schema::PurchaseRecord, RetryError<StoreError>> {
        let store = &self.store;
        let write_timeout = self.config.write_timeout;

        with_retry_if(
            self.config.store_retry.clone(),
            |e: &StoreError| e.is_transient(),
            || async move {
                with_timeout_result(write_timeout, store.insert(event))
                    .await
                    .map_err(|e| match e {
                        TimeoutError::Elapsed(d) => {
                            StoreError::Unavailable(format!("insert timed out after {:?}", d))
                        }
                        TimeoutError::OperationFailed(e) => e,
                    })
            },
        )
        .await
    }

    async fn commit(&mut self, record: &BrokerRecord) {
        self.status.set_state(WorkerState::Committing);
        match self.source.commit(record).await {
            Ok(()) => self.status.mark_commit(),
            Err(e) => {
                // Not fatal: the message is re-delivered and stored again
                warn!(
                    partition = record.partition,
                    offset = record.offset,
                    error = %e,
                    "Failed to commit offset"
                );
            }
        }
    }
}

/// Resolves once shutdown was requested or the sender is gone
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{EventSink, InMemoryBroker};
    use crate::store::InMemoryPurchaseStore;

    const TOPIC: &str = "purchase-events";
    const GROUP: &str = "test-group";

    fn fast_config() -> WorkerConfig {
        let retry = RetryConfig {
            max_retries: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            jitter: false,
        };
        WorkerConfig {
            poll_timeout: Duration::from_millis(20),
            drain_timeout: Duration::from_millis(500),
            write_timeout: Duration::from_millis(200),
            store_retry: retry.clone(),
            pause_backoff: retry,
        }
    }

    fn worker(broker: &InMemoryBroker, store: &InMemoryPurchaseStore) -> (ConsumerWorker, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let worker = ConsumerWorker::new(
            0,
            Box::new(broker.subscribe(GROUP, TOPIC)),
            Arc::new(store.clone()),
            Arc::new(ConsumerStatus::new(0)),
            fast_config(),
            rx,
        );
        (worker, tx)
    }

    async fn publish(broker: &InMemoryBroker, user_id: &str, price: f64) {
        let event = PurchaseEvent::new(user_id, "jdoe", price, "2024-01-01T00:00:00Z").unwrap();
        broker
            .send(TOPIC, user_id, &event.encode().unwrap(), Duration::from_millis(10))
            .await
            .unwrap();
    }

    async fn next(worker: &mut ConsumerWorker) -> BrokerRecord {
        worker
            .source
            .poll(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_persist_then_commit() {
        let broker = InMemoryBroker::new(1);
        let store = InMemoryPurchaseStore::new();
        publish(&broker, "u1", 9.99).await;

        let (mut worker, _tx) = worker(&broker, &store);
        let record = next(&mut worker).await;

        assert_eq!(worker.process(record).await, Outcome::Persisted);
        assert_eq!(store.len(), 1);
        assert_eq!(broker.committed_offset(GROUP, TOPIC, 0), Some(1));
    }

    #[tokio::test]
    async fn test_malformed_message_is_skipped_and_committed() {
        let broker = InMemoryBroker::new(1);
        let store = InMemoryPurchaseStore::new();
        broker.append_raw(TOPIC, Some(b"u1"), Some(b"{not json"));

        let (mut worker, _tx) = worker(&broker, &store);
        let record = next(&mut worker).await;

        assert_eq!(worker.process(record).await, Outcome::Skipped);
        assert!(store.is_empty());
        assert_eq!(store.insert_attempts(), 0);
        assert_eq!(broker.committed_offset(GROUP, TOPIC, 0), Some(1));
        assert_eq!(worker.status.skipped(), 1);
    }

    #[tokio::test]
    async fn test_store_outage_rewinds_without_commit() {
        let broker = InMemoryBroker::new(1);
        let store = InMemoryPurchaseStore::new();
        publish(&broker, "u1", 1.0).await;
        store.set_available(false);

        let (mut worker, _tx) = worker(&broker, &store);
        let record = next(&mut worker).await;

        assert_eq!(worker.process(record.clone()).await, Outcome::Paused);
        assert_eq!(store.insert_attempts(), 3);
        assert_eq!(broker.committed_offset(GROUP, TOPIC, 0), None);
        assert!(worker.status.is_paused());

        store.set_available(true);
        let again = next(&mut worker).await;
        assert_eq!(again.offset, record.offset);
        assert_eq!(worker.process(again).await, Outcome::Persisted);
        assert_eq!(broker.committed_offset(GROUP, TOPIC, 0), Some(1));
        assert!(!worker.status.is_paused());
    }

    #[tokio::test]
    async fn test_prefetched_messages_after_rewind_are_discarded() {
        let broker = InMemoryBroker::new(1);
        let store = InMemoryPurchaseStore::new();
        let (mut worker, _tx) = worker(&broker, &store);
        worker.rewound.insert(0, 4);

        let prefetched = BrokerRecord {
            topic: TOPIC.into(),
            partition: 0,
            offset: 5,
            key: None,
            payload: None,
        };
        assert_eq!(worker.process(prefetched).await, Outcome::Discarded);
        assert_eq!(worker.rewound.get(&0), Some(&4));
    }

    #[tokio::test]
    async fn test_rewind_is_dropped_when_partition_changes_hands() {
        let broker = InMemoryBroker::new(2);
        let store = InMemoryPurchaseStore::new();
        let user = (0..)
            .map(|i| format!("u{i}"))
            .find(|u| broker.partition_for(u.as_bytes()) == 1)
            .unwrap();
        publish(&broker, &user, 1.0).await;
        store.set_available(false);

        let (mut worker, _tx) = worker(&broker, &store);
        let first = next(&mut worker).await;
        assert_eq!((first.partition, first.offset), (1, 0));
        assert_eq!(worker.process(first).await, Outcome::Paused);
        assert_eq!(worker.rewound.get(&1), Some(&0));

        // While the worker sleeps, another member takes partition 1, stores the message and leaves
        let mut other = broker.subscribe(GROUP, TOPIC);
        let taken = other.poll(Duration::from_millis(100)).await.unwrap().unwrap();
        assert_eq!((taken.partition, taken.offset), (1, 0));
        other.commit(&taken).await.unwrap();
        other.close().await.unwrap();
        assert_eq!(broker.committed_offset(GROUP, TOPIC, 1), Some(1));

        store.set_available(true);
        publish(&broker, &user, 2.0).await;

        let second = next(&mut worker).await;
        assert_eq!((second.partition, second.offset), (1, 1));
        assert_eq!(worker.process(second).await, Outcome::Persisted);
        assert_eq!(store.len(), 1);
        assert_eq!(broker.committed_offset(GROUP, TOPIC, 1), Some(2));
        assert!(worker.rewound.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_write_is_committed() {
        let broker = InMemoryBroker::new(1);
        let store = InMemoryPurchaseStore::new();
        publish(&broker, "u1", 1.0).await;
        store.set_rejecting(true);

        let (mut worker, _tx) = worker(&broker, &store);
        let record = next(&mut worker).await;

        assert_eq!(worker.process(record).await, Outcome::Rejected);
        assert_eq!(store.insert_attempts(), 1);
        assert_eq!(broker.committed_offset(GROUP, TOPIC, 0), Some(1));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let broker = InMemoryBroker::new(2);
        let store = InMemoryPurchaseStore::new();
        publish(&broker, "u1", 1.0).await;
        publish(&broker, "u2", 2.0).await;

        let (worker, tx) = worker(&broker, &store);
        let status = worker.status();
        let handle = tokio::spawn(worker.run());

        for _ in 0..100 {
            if store.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.len(), 2);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.state(), WorkerState::Stopped);
    }
}
