//! Broker seam: publishing to and consuming from the partitioned purchase topic
//!
//! `kafka` is the production implementation; `memory` is an in-process partitioned log
//! with consumer-group coordination used by the tests.
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub mod kafka;
pub mod memory;

pub use kafka::{KafkaEventSink, KafkaEventSource};
pub use memory::{InMemoryBroker, InMemoryEventSource};

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Kafka client error: {0}")]
    Client(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Broker did not respond within {0:?}")]
    Timeout(Duration),

    #[error("Commit failed: {0}")]
    Commit(String),

    #[error("Broker unavailable: {0}")]
    Unavailable(String),
}

/// A message read from the topic, detached from the client buffers
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
}

/// Broker acknowledgment of a send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub partition: i32,
    pub offset: i64,
}

/// Producer side of the topic
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Send one keyed message and wait for the acknowledgment
    async fn send(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Delivery, BrokerError>;

    /// Check that the cluster answers metadata requests
    async fn probe(&self, timeout: Duration) -> Result<(), BrokerError>;

    /// Wait for queued messages to be delivered
    async fn flush(&self, _timeout: Duration) -> Result<(), BrokerError> {
        Ok(())
    }
}

/// One consumer-group member
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Next record from any assigned partition, `None` when nothing arrived within `timeout`
    async fn poll(&mut self, timeout: Duration) -> Result<Option<BrokerRecord>, BrokerError>;

    /// Mark `record` as processed: the group resumes after it
    async fn commit(&mut self, record: &BrokerRecord) -> Result<(), BrokerError>;

    /// Re-deliver `record` on the next polls of its partition
    async fn rewind(&mut self, record: &BrokerRecord) -> Result<(), BrokerError>;

    /// Partitions currently owned by this member
    fn assignment(&self) -> Vec<i32>;

    /// Changes whenever a rebalance handed this member a new assignment. Positions of
    /// reassigned partitions restart from the group's committed offsets.
    fn generation(&self) -> u64;

    /// Leave the group
    async fn close(&mut self) -> Result<(), BrokerError>;
}
