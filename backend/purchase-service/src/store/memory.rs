use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use event_schema::{PurchaseEvent, PurchaseRecord};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::{PurchaseStore, StoreError};

#[derive(Default)]
struct Inner {
    records: Vec<PurchaseRecord>,
    last_created_at: Option<DateTime<Utc>>,
}

/// In-process purchase store with fault injection
#[derive(Clone)]
pub struct InMemoryPurchaseStore {
    inner: Arc<Mutex<Inner>>,
    available: Arc<AtomicBool>,
    rejecting: Arc<AtomicBool>,
    insert_attempts: Arc<AtomicU64>,
    insert_delay_ms: Arc<AtomicU64>,
}

impl Default for InMemoryPurchaseStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPurchaseStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            available: Arc::new(AtomicBool::new(true)),
            rejecting: Arc::new(AtomicBool::new(false)),
            insert_attempts: Arc::new(AtomicU64::new(0)),
            insert_delay_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    /// While unavailable every call fails with `StoreError::Unavailable`
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// While rejecting, inserts fail with `StoreError::Rejected`
    pub fn set_rejecting(&self, rejecting: bool) {
        self.rejecting.store(rejecting, Ordering::SeqCst);
    }

    /// Every insert started after this call takes at least `delay` before it lands
    pub fn set_insert_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.insert_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Inserts attempted so far, failed ones included
    pub fn insert_attempts(&self) -> u64 {
        self.insert_attempts.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }
}

#[async_trait]
impl PurchaseStore for InMemoryPurchaseStore {
    async fn insert(&self, event: &PurchaseEvent) -> Result<PurchaseRecord, StoreError> {
        self.insert_attempts.fetch_add(1, Ordering::SeqCst);

        let delay = self.insert_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.check_available()?;

        if self.rejecting.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected("insert rejected by constraint".into()));
        }

        let mut inner = self.inner.lock();

        // createdAt never goes backwards, even if the wall clock does
        let now = Utc::now();
        let created_at = match inner.last_created_at {
            Some(last) if now <= last => last + ChronoDuration::microseconds(1),
            _ => now,
        };
        inner.last_created_at = Some(created_at);

        let record = PurchaseRecord::from_event(event, Uuid::new_v4(), created_at);
        inner.records.push(record.clone());
        Ok(record)
    }

    async fn find_by_user(&self, user_id: &str) -> Result<Vec<PurchaseRecord>, StoreError> {
        self.check_available()?;

        Ok(self
            .inner
            .lock()
            .records
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn find_all(&self, limit: i64) -> Result<Vec<PurchaseRecord>, StoreError> {
        self.check_available()?;

        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        Ok(self
            .inner
            .lock()
            .records
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }
}
