//! Purchase event publisher
//!
//! Validates, serializes and sends purchase events keyed by user id. Every send waits for
//! the broker acknowledgment within a bounded timeout and is retried a bounded number of
//! times; the outcome of the last send feeds the publisher health signal.
use chrono::{SecondsFormat, Utc};
use event_schema::{EventError, PurchaseEvent};
use parking_lot::RwLock;
use resilience::{with_retry, with_timeout_result, RetryConfig, TimeoutError};
use serde::Deserialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

use crate::broker::{BrokerError, EventSink};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Invalid purchase event: {0}")]
    Validation(#[from] EventError),

    #[error("Failed to serialize purchase event: {0}")]
    Serialization(String),

    #[error("Delivery failed after {attempts} attempt(s): {source}")]
    Delivery {
        attempts: u32,
        #[source]
        source: BrokerError,
    },
}

/// Broker acknowledgment of a published event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub partition: i32,
    pub offset: i64,
    pub attempts: u32,
}

/// Body of `POST /buy`
#[derive(Debug, Clone, Deserialize)]
pub struct BuyRequest {
    pub username: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    pub price: f64,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Result of the most recent send
#[derive(Debug, Clone, Copy)]
pub struct SendOutcome {
    pub succeeded: bool,
    pub at: Instant,
}

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub topic: String,
    /// Per-attempt acknowledgment timeout
    pub send_timeout: Duration,
    pub retry: RetryConfig,
}

impl PublisherConfig {
    pub fn new(topic: impl Into<String>, send_timeout: Duration, max_retries: u32) -> Self {
        let preset = resilience::kafka_producer_config();
        Self {
            topic: topic.into(),
            send_timeout,
            retry: RetryConfig {
                max_retries,
                ..preset.retry.unwrap_or_default()
            },
        }
    }
}

pub struct Publisher {
    sink: Arc<dyn EventSink>,
    config: PublisherConfig,
    last_outcome: RwLock<Option<SendOutcome>>,
}

impl Publisher {
    pub fn new(sink: Arc<dyn EventSink>, config: PublisherConfig) -> Self {
        Self {
            sink,
            config,
            last_outcome: RwLock::new(None),
        }
    }

    pub fn topic(&self) -> &str {
        &self.config.topic
    }

    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    pub fn last_outcome(&self) -> Option<SendOutcome> {
        *self.last_outcome.read()
    }

    /// Build an event from a gateway request and publish it.
    ///
    /// A missing timestamp is filled with the current UTC time.
    pub async fn submit(&self, request: BuyRequest) -> Result<(PurchaseEvent, Ack), PublishError> {
        let timestamp = request
            .timestamp
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true));

        let event = PurchaseEvent::new(request.user_id, request.username, request.price, timestamp)?;
        let ack = self.publish(&event).await?;
        Ok((event, ack))
    }

    /// Publish a validated event, keyed by its user id
    pub async fn publish(&self, event: &PurchaseEvent) -> Result<Ack, PublishError> {
        let payload = event
            .encode()
            .map_err(|e| PublishError::Serialization(e.to_string()))?;
        let payload = payload.as_slice();
        let key = event.partition_key();
        let topic = self.config.topic.as_str();
        let send_timeout = self.config.send_timeout;
        let sink = &self.sink;
        let attempts = AtomicU32::new(0);

        // The sink gets the timeout too, but a send that ignores it must not hang the caller
        let result = with_retry(self.config.retry.clone(), || {
            attempts.fetch_add(1, Ordering::Relaxed);
            async move {
                with_timeout_result(send_timeout, sink.send(topic, key, payload, send_timeout))
                    .await
                    .map_err(|e| match e {
                        TimeoutError::Elapsed(d) => BrokerError::Timeout(d),
                        TimeoutError::OperationFailed(e) => e,
                    })
            }
        })
        .await;

        let attempts = attempts.load(Ordering::Relaxed);
        self.record_outcome(result.is_ok());

        match result {
            Ok(delivery) => {
                info!(
                    user_id = %key,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    attempts,
                    "Purchase event published"
                );
                Ok(Ack {
                    partition: delivery.partition,
                    offset: delivery.offset,
                    attempts,
                })
            }
            Err(e) => {
                let source = e.into_inner();
                warn!(user_id = %key, attempts, error = %source, "Failed to publish purchase event");
                Err(PublishError::Delivery { attempts, source })
            }
        }
    }

    /// Wait for in-flight messages before shutdown
    pub async fn flush(&self, timeout: Duration) -> Result<(), BrokerError> {
        self.sink.flush(timeout).await
    }

    fn record_outcome(&self, succeeded: bool) {
        *self.last_outcome.write() = Some(SendOutcome {
            succeeded,
            at: Instant::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Delivery, InMemoryBroker};
    use async_trait::async_trait;

    fn fast_config() -> PublisherConfig {
        PublisherConfig {
            topic: "purchase-events".into(),
            send_timeout: Duration::from_millis(50),
            retry: RetryConfig {
                max_retries: 2,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(5),
                backoff_multiplier: 2.0,
                jitter: false,
            },
        }
    }

    /// Fails the first `failures` sends
    struct FlakySink {
        failures: AtomicU32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl EventSink for FlakySink {
        async fn send(
            &self,
            _topic: &str,
            _key: &str,
            _payload: &[u8],
            timeout: Duration,
        ) -> Result<Delivery, BrokerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(BrokerError::Timeout(timeout));
            }
            Ok(Delivery {
                partition: 0,
                offset: 7,
            })
        }

        async fn probe(&self, _timeout: Duration) -> Result<(), BrokerError> {
            Ok(())
        }
    }

    /// Never answers, whatever timeout it is handed
    struct HangingSink {
        calls: AtomicU32,
    }

    #[async_trait]
    impl EventSink for HangingSink {
        async fn send(
            &self,
            _topic: &str,
            _key: &str,
            _payload: &[u8],
            _timeout: Duration,
        ) -> Result<Delivery, BrokerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }

        async fn probe(&self, _timeout: Duration) -> Result<(), BrokerError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_publish_routes_by_user_id() {
        let broker = InMemoryBroker::new(4);
        let publisher = Publisher::new(Arc::new(broker.clone()), fast_config());

        let event = PurchaseEvent::new("u1", "jdoe", 9.99, "2024-01-01T00:00:00Z").unwrap();
        let ack = publisher.publish(&event).await.unwrap();

        assert_eq!(ack.partition, broker.partition_for(b"u1"));
        assert_eq!(ack.attempts, 1);
        assert!(publisher.last_outcome().unwrap().succeeded);
    }

    #[tokio::test]
    async fn test_validation_happens_before_send() {
        let broker = InMemoryBroker::new(1);
        let publisher = Publisher::new(Arc::new(broker.clone()), fast_config());

        let err = publisher
            .submit(BuyRequest {
                username: "jdoe".into(),
                user_id: "u1".into(),
                price: -1.0,
                timestamp: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, PublishError::Validation(EventError::InvalidPrice(_))));
        assert_eq!(broker.log_end_offset("purchase-events", 0), 0);
        assert!(publisher.last_outcome().is_none());
    }

    #[tokio::test]
    async fn test_submit_fills_missing_timestamp() {
        let broker = InMemoryBroker::new(1);
        let publisher = Publisher::new(Arc::new(broker), fast_config());

        let (event, _) = publisher
            .submit(BuyRequest {
                username: "jdoe".into(),
                user_id: "u1".into(),
                price: 9.99,
                timestamp: None,
            })
            .await
            .unwrap();

        assert!(chrono::DateTime::parse_from_rfc3339(event.timestamp()).is_ok());
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let sink = Arc::new(FlakySink {
            failures: AtomicU32::new(2),
            calls: AtomicU32::new(0),
        });
        let publisher = Publisher::new(sink.clone(), fast_config());

        let event = PurchaseEvent::new("u1", "jdoe", 1.0, "2024-01-01T00:00:00Z").unwrap();
        let ack = publisher.publish(&event).await.unwrap();

        assert_eq!(ack.attempts, 3);
        assert_eq!(ack.offset, 7);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_delivery_error() {
        let broker = InMemoryBroker::new(1);
        broker.set_available(false);
        let publisher = Publisher::new(Arc::new(broker.clone()), fast_config());

        let event = PurchaseEvent::new("u1", "jdoe", 1.0, "2024-01-01T00:00:00Z").unwrap();
        let err = publisher.publish(&event).await.unwrap_err();

        assert!(matches!(err, PublishError::Delivery { attempts: 3, .. }));
        assert!(!publisher.last_outcome().unwrap().succeeded);
        assert_eq!(broker.log_end_offset("purchase-events", 0), 0);
    }

    #[tokio::test]
    async fn test_unresponsive_sink_is_bounded_by_send_timeout() {
        let sink = Arc::new(HangingSink {
            calls: AtomicU32::new(0),
        });
        let publisher = Publisher::new(sink.clone(), fast_config());

        let event = PurchaseEvent::new("u1", "jdoe", 1.0, "2024-01-01T00:00:00Z").unwrap();
        let result = tokio::time::timeout(Duration::from_secs(2), publisher.publish(&event))
            .await
            .expect("publish must finish within its retry budget");

        match result {
            Err(PublishError::Delivery {
                attempts,
                source: BrokerError::Timeout(elapsed),
            }) => {
                assert_eq!(attempts, 3);
                assert_eq!(elapsed, Duration::from_millis(50));
            }
            other => panic!("expected a delivery timeout, got {:?}", other),
        }
        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
        assert!(!publisher.last_outcome().unwrap().succeeded);
    }
}
