use event_schema::PurchaseRecord;
use resilience::{with_timeout_result, TimeoutError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error};

use crate::store::{PurchaseStore, StoreError};

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Store read failed: {0}")]
    Store(#[from] StoreError),

    #[error("Store read timed out after {0:?}")]
    Timeout(Duration),
}

/// Read-only access to persisted purchases
#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn PurchaseStore>,
    read_timeout: Duration,
    default_limit: i64,
    max_limit: i64,
}

impl QueryService {
    pub fn new(store: Arc<dyn PurchaseStore>, default_limit: i64, max_limit: i64) -> Self {
        Self {
            store,
            read_timeout: resilience::store_read_config().timeout.duration,
            default_limit,
            max_limit: max_limit.max(1),
        }
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Purchases of one user in insertion order; empty for unknown users
    pub async fn get_by_user(&self, user_id: &str) -> Result<Vec<PurchaseRecord>, QueryError> {
        let records = self.read(self.store.find_by_user(user_id)).await?;
        debug!(user_id, count = records.len(), "Retrieved purchases for user");
        Ok(records)
    }

    /// Most recent purchases, newest first
    pub async fn get_recent(&self, limit: Option<i64>) -> Result<Vec<PurchaseRecord>, QueryError> {
        let limit = self.clamp_limit(limit);
        let records = self.read(self.store.find_all(limit)).await?;
        debug!(limit, count = records.len(), "Retrieved recent purchases");
        Ok(records)
    }

    /// Effective limit: default when absent, clamped to `1..=max_limit`
    pub fn clamp_limit(&self, limit: Option<i64>) -> i64 {
        limit.unwrap_or(self.default_limit).clamp(1, self.max_limit)
    }

    async fn read<F>(&self, future: F) -> Result<Vec<PurchaseRecord>, QueryError>
    where
        F: std::future::Future<Output = Result<Vec<PurchaseRecord>, StoreError>>,
    {
        with_timeout_result(self.read_timeout, future)
            .await
            .map_err(|e| {
                let err = match e {
                    TimeoutError::Elapsed(d) => QueryError::Timeout(d),
                    TimeoutError::OperationFailed(e) => QueryError::Store(e),
                };
                error!(error = %err, "Purchase query failed");
                err
            })
    }
}
