use async_trait::async_trait;
use rdkafka::client::ClientContext;
use rdkafka::consumer::{CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{BrokerError, BrokerRecord, Delivery, EventSink, EventSource};

/// Kafka producer for purchase events
#[derive(Clone)]
pub struct KafkaEventSink {
    producer: FutureProducer,
    topic: String,
}

impl KafkaEventSink {
    pub fn new(brokers: &str, topic: &str, message_timeout: Duration) -> Result<Self, BrokerError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", message_timeout.as_millis().to_string())
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("max.in.flight.requests.per.connection", "1")
            .set("retries", "3")
            .set("retry.backoff.ms", "100")
            .create()
            .map_err(|e| BrokerError::Client(e.to_string()))?;

        info!("Kafka producer initialized for topic {}", topic);

        Ok(Self {
            producer,
            topic: topic.to_string(),
        })
    }
}

#[async_trait]
impl EventSink for KafkaEventSink {
    async fn send(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
        send_timeout: Duration,
    ) -> Result<Delivery, BrokerError> {
        let record = FutureRecord::to(topic).payload(payload).key(key);

        debug!("Publishing event to topic {} (key={})", topic, key);

        match timeout(send_timeout, self.producer.send(record, send_timeout)).await {
            Ok(Ok((partition, offset))) => Ok(Delivery { partition, offset }),
            Ok(Err((e, _))) => Err(BrokerError::Delivery(e.to_string())),
            Err(_) => {
                warn!("Kafka send timed out after {:?}", send_timeout);
                Err(BrokerError::Timeout(send_timeout))
            }
        }
    }

    /// Fetches topic metadata on the blocking pool
    async fn probe(&self, probe_timeout: Duration) -> Result<(), BrokerError> {
        let producer = self.producer.clone();
        let topic = self.topic.clone();

        tokio::task::spawn_blocking(move || {
            producer
                .client()
                .fetch_metadata(Some(topic.as_str()), probe_timeout)
                .map(|_| ())
                .map_err(|e| BrokerError::Unavailable(e.to_string()))
        })
        .await
        .map_err(|e| BrokerError::Client(e.to_string()))?
    }

    async fn flush(&self, flush_timeout: Duration) -> Result<(), BrokerError> {
        let producer = self.producer.clone();

        tokio::task::spawn_blocking(move || {
            producer
                .flush(flush_timeout)
                .map_err(|e| BrokerError::Delivery(e.to_string()))
        })
        .await
        .map_err(|e| BrokerError::Client(e.to_string()))?
    }
}

/// Counts assignments handed to this member by the group coordinator
#[derive(Default)]
pub struct RebalanceContext {
    generation: AtomicU64,
}

impl ClientContext for RebalanceContext {}

impl ConsumerContext for RebalanceContext {
    fn post_rebalance<'a>(&self, rebalance: &Rebalance<'a>) {
        match rebalance {
            Rebalance::Assign(tpl) => {
                let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
                info!(generation, partitions = tpl.count(), "Kafka partitions assigned");
            }
            Rebalance::Revoke(tpl) => {
                info!(partitions = tpl.count(), "Kafka partitions revoked");
            }
            Rebalance::Error(e) => warn!("Kafka rebalance error: {}", e),
        }
    }
}

/// Kafka consumer-group member with manual offset commits
pub struct KafkaEventSource {
    consumer: StreamConsumer<RebalanceContext>,
    seek_timeout: Duration,
}

impl KafkaEventSource {
    pub fn new(brokers: &str, group_id: &str, topic: &str) -> Result<Self, BrokerError> {
        let consumer: StreamConsumer<RebalanceContext> = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "false") // Manual commit after confirmed writes
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "45000")
            .set("max.poll.interval.ms", "300000")
            .set("enable.partition.eof", "false")
            .create_with_context(RebalanceContext::default())
            .map_err(|e| BrokerError::Client(e.to_string()))?;

        consumer
            .subscribe(&[topic])
            .map_err(|e| BrokerError::Client(e.to_string()))?;

        info!(group_id, topic, "Kafka consumer subscribed");

        Ok(Self {
            consumer,
            seek_timeout: Duration::from_secs(5),
        })
    }
}

#[async_trait]
impl EventSource for KafkaEventSource {
    async fn poll(&mut self, poll_timeout: Duration) -> Result<Option<BrokerRecord>, BrokerError> {
        match timeout(poll_timeout, self.consumer.recv()).await {
            Err(_) => Ok(None),
            Ok(Err(e)) => Err(BrokerError::Client(e.to_string())),
            Ok(Ok(message)) => Ok(Some(BrokerRecord {
                topic: message.topic().to_string(),
                partition: message.partition(),
                offset: message.offset(),
                key: message.key().map(|k| k.to_vec()),
                payload: message.payload().map(|p| p.to_vec()),
            })),
        }
    }

    async fn commit(&mut self, record: &BrokerRecord) -> Result<(), BrokerError> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&record.topic, record.partition, Offset::Offset(record.offset + 1))
            .map_err(|e| BrokerError::Commit(e.to_string()))?;

        self.consumer
            .commit(&tpl, CommitMode::Async)
            .map_err(|e| BrokerError::Commit(e.to_string()))
    }

    async fn rewind(&mut self, record: &BrokerRecord) -> Result<(), BrokerError> {
        self.consumer
            .seek(
                &record.topic,
                record.partition,
                Offset::Offset(record.offset),
                self.seek_timeout,
            )
            .map_err(|e| BrokerError::Client(e.to_string()))
    }

    fn assignment(&self) -> Vec<i32> {
        match self.consumer.assignment() {
            Ok(tpl) => tpl.elements().iter().map(|e| e.partition()).collect(),
            Err(e) => {
                warn!("Failed to read consumer assignment: {}", e);
                Vec::new()
            }
        }
    }

    fn generation(&self) -> u64 {
        self.consumer.context().generation.load(Ordering::Relaxed)
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        self.consumer.unsubscribe();
        Ok(())
    }
}
