//! In-process partitioned log with consumer groups
//!
//! Mirrors the broker behaviour the pipeline relies on: keyed partitioning, per-partition
//! ordering, committed offsets per group, round-robin assignment of partitions to group
//! members with a generation bump on every membership change, and positions reset to the
//! committed offset when the assignment changes.
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use super::{BrokerError, BrokerRecord, Delivery, EventSink, EventSource};

#[derive(Debug, Clone)]
struct StoredMessage {
    key: Option<Vec<u8>>,
    payload: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct GroupState {
    members: BTreeSet<u64>,
    generation: u64,
    committed: HashMap<(String, i32), i64>,
}

#[derive(Debug)]
struct BrokerState {
    logs: HashMap<String, Vec<Vec<StoredMessage>>>,
    groups: HashMap<String, GroupState>,
    available: bool,
}

impl BrokerState {
    fn log_mut(&mut self, topic: &str, partitions: i32) -> &mut Vec<Vec<StoredMessage>> {
        self.logs
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); partitions as usize])
    }
}

/// Shared handle to the in-memory broker; clones see the same log
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    changes: Arc<watch::Sender<u64>>,
    partitions: i32,
    next_member: Arc<AtomicU64>,
}

impl InMemoryBroker {
    pub fn new(partitions: i32) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            state: Arc::new(Mutex::new(BrokerState {
                logs: HashMap::new(),
                groups: HashMap::new(),
                available: true,
            })),
            changes: Arc::new(changes),
            partitions: partitions.max(1),
            next_member: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn partition_count(&self) -> i32 {
        self.partitions
    }

    /// Partition a key is routed to
    pub fn partition_for(&self, key: &[u8]) -> i32 {
        (fnv1a(key) % self.partitions as u64) as i32
    }

    /// Simulate a broker outage for producers
    pub fn set_available(&self, available: bool) {
        self.state.lock().available = available;
    }

    /// Append raw bytes, bypassing producer-side validation
    pub fn append_raw(&self, topic: &str, key: Option<&[u8]>, payload: Option<&[u8]>) -> Delivery {
        let partition = key.map(|k| self.partition_for(k)).unwrap_or(0);
        let offset = {
            let mut state = self.state.lock();
            let log = &mut state.log_mut(topic, self.partitions)[partition as usize];
            log.push(StoredMessage {
                key: key.map(|k| k.to_vec()),
                payload: payload.map(|p| p.to_vec()),
            });
            (log.len() - 1) as i64
        };
        self.notify();
        Delivery { partition, offset }
    }

    /// Number of messages written to a partition
    pub fn log_end_offset(&self, topic: &str, partition: i32) -> i64 {
        self.state
            .lock()
            .logs
            .get(topic)
            .and_then(|log| log.get(partition as usize))
            .map(|p| p.len() as i64)
            .unwrap_or(0)
    }

    /// Next offset the group will read from a partition, if it committed one
    pub fn committed_offset(&self, group_id: &str, topic: &str, partition: i32) -> Option<i64> {
        self.state
            .lock()
            .groups
            .get(group_id)
            .and_then(|g| g.committed.get(&(topic.to_string(), partition)).copied())
    }

    /// Join `group_id` as a new member consuming `topic`
    pub fn subscribe(&self, group_id: &str, topic: &str) -> InMemoryEventSource {
        let member_id = self.next_member.fetch_add(1, Ordering::Relaxed);
        {
            let mut state = self.state.lock();
            state.log_mut(topic, self.partitions);
            let group = state.groups.entry(group_id.to_string()).or_default();
            group.members.insert(member_id);
            group.generation += 1;
        }
        self.notify();

        debug!(member_id, group_id, topic, "Member joined consumer group");

        InMemoryEventSource {
            broker: self.clone(),
            changes: self.changes.subscribe(),
            group_id: group_id.to_string(),
            topic: topic.to_string(),
            member_id,
            generation: 0,
            owned: Vec::new(),
            positions: HashMap::new(),
            cursor: 0,
            closed: false,
        }
    }

    fn notify(&self) {
        self.changes.send_modify(|version| *version += 1);
    }
}

#[async_trait]
impl EventSink for InMemoryBroker {
    async fn send(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
        _timeout: Duration,
    ) -> Result<Delivery, BrokerError> {
        if !self.state.lock().available {
            return Err(BrokerError::Unavailable("in-memory broker is down".into()));
        }
        Ok(self.append_raw(topic, Some(key.as_bytes()), Some(payload)))
    }

    async fn probe(&self, _timeout: Duration) -> Result<(), BrokerError> {
        if self.state.lock().available {
            Ok(())
        } else {
            Err(BrokerError::Unavailable("in-memory broker is down".into()))
        }
    }
}

/// One member of an in-memory consumer group
pub struct InMemoryEventSource {
    broker: InMemoryBroker,
    changes: watch::Receiver<u64>,
    group_id: String,
    topic: String,
    member_id: u64,
    generation: u64,
    owned: Vec<i32>,
    positions: HashMap<i32, i64>,
    cursor: usize,
    closed: bool,
}

impl InMemoryEventSource {
    pub fn member_id(&self) -> u64 {
        self.member_id
    }

    /// Pick up a new assignment if the group generation moved
    fn sync_assignment(&mut self, state: &BrokerState) {
        let Some(group) = state.groups.get(&self.group_id) else {
            return;
        };
        if group.generation == self.generation {
            return;
        }

        let members: Vec<u64> = group.members.iter().copied().collect();
        let index = members.iter().position(|m| *m == self.member_id);

        self.owned = match index {
            Some(index) => (0..self.broker.partitions)
                .filter(|p| (*p as usize) % members.len() == index)
                .collect(),
            None => Vec::new(),
        };

        self.positions = self
            .owned
            .iter()
            .map(|p| {
                let committed = group
                    .committed
                    .get(&(self.topic.clone(), *p))
                    .copied()
                    .unwrap_or(0);
                (*p, committed)
            })
            .collect();

        self.generation = group.generation;
        self.cursor = 0;

        debug!(
            member_id = self.member_id,
            generation = self.generation,
            partitions = ?self.owned,
            "Partitions assigned"
        );
    }

    /// Next unread message across owned partitions, rotating the starting partition
    fn take_next(&mut self, state: &BrokerState) -> Option<BrokerRecord> {
        let log = state.logs.get(&self.topic)?;
        let count = self.owned.len();

        for step in 0..count {
            let partition = self.owned[(self.cursor + step) % count];
            let position = self.positions.get(&partition).copied().unwrap_or(0);

            if let Some(message) = log
                .get(partition as usize)
                .and_then(|p| p.get(position as usize))
            {
                self.positions.insert(partition, position + 1);
                self.cursor = (self.cursor + step + 1) % count;
                return Some(BrokerRecord {
                    topic: self.topic.clone(),
                    partition,
                    offset: position,
                    key: message.key.clone(),
                    payload: message.payload.clone(),
                });
            }
        }

        None
    }

    fn owns(&self, record: &BrokerRecord) -> Result<(), BrokerError> {
        if self.closed {
            return Err(BrokerError::Commit("member has left the group".into()));
        }
        let state = self.broker.state.lock();
        let current = state
            .groups
            .get(&self.group_id)
            .map(|g| g.generation)
            .unwrap_or(0);

        if current != self.generation || !self.owned.contains(&record.partition) {
            return Err(BrokerError::Commit(format!(
                "partition {} is not assigned to member {}",
                record.partition, self.member_id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl EventSource for InMemoryEventSource {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<BrokerRecord>, BrokerError> {
        if self.closed {
            return Err(BrokerError::Client("member has left the group".into()));
        }

        let deadline = Instant::now() + timeout;

        loop {
            self.changes.borrow_and_update();

            let broker = self.broker.clone();
            let next = {
                let state = broker.state.lock();
                self.sync_assignment(&state);
                self.take_next(&state)
            };
            if next.is_some() {
                return Ok(next);
            }

            match tokio::time::timeout_at(deadline, self.changes.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) | Err(_) => return Ok(None),
            }
        }
    }

    async fn commit(&mut self, record: &BrokerRecord) -> Result<(), BrokerError> {
        self.owns(record)?;

        let mut state = self.broker.state.lock();
        if let Some(group) = state.groups.get_mut(&self.group_id) {
            group
                .committed
                .insert((record.topic.clone(), record.partition), record.offset + 1);
        }
        Ok(())
    }

    async fn rewind(&mut self, record: &BrokerRecord) -> Result<(), BrokerError> {
        self.owns(record)?;
        self.positions.insert(record.partition, record.offset);
        Ok(())
    }

    fn assignment(&self) -> Vec<i32> {
        self.owned.clone()
    }

    fn generation(&self) -> u64 {
        self.generation
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        if self.closed {
            return Ok(());
        }
        {
            let mut state = self.broker.state.lock();
            if let Some(group) = state.groups.get_mut(&self.group_id) {
                group.members.remove(&self.member_id);
                group.generation += 1;
            }
        }
        self.closed = true;
        self.owned.clear();
        self.broker.notify();

        debug!(member_id = self.member_id, group_id = %self.group_id, "Member left consumer group");
        Ok(())
    }
}

/// FNV-1a, stable across runs so keys always land on the same partition
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    bytes.iter().fold(OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(PRIME)
    })
}
