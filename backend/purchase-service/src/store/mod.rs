//! Store access layer for purchase records
use async_trait::async_trait;
use event_schema::{PurchaseEvent, PurchaseRecord};
use thiserror::Error;

pub mod memory;
pub mod postgres;

pub use memory::InMemoryPurchaseStore;
pub use postgres::PgPurchaseStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Connectivity, pool exhaustion or timeout: the same call may succeed later
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The store refused the operation (constraint violation, bad row)
    #[error("Store rejected operation: {0}")]
    Rejected(String),
}

impl StoreError {
    /// Check if error is transient (should retry)
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if is_transient_sqlx(&err) {
            StoreError::Unavailable(err.to_string())
        } else {
            StoreError::Rejected(err.to_string())
        }
    }
}

fn is_transient_sqlx(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db_err) => db_err
            .code()
            .map(|code| is_transient_sqlstate(&code))
            .unwrap_or(false),
        _ => false,
    }
}

/// Connection exceptions (08), insufficient resources (53), operator intervention (57P)
/// and serialization failures
fn is_transient_sqlstate(code: &str) -> bool {
    code.starts_with("08") || code.starts_with("53") || code.starts_with("57P") || code == "40001"
}

/// Persistent, append-only collection of purchase records indexed by user id
#[async_trait]
pub trait PurchaseStore: Send + Sync {
    /// Persist one event, assigning `id` and `createdAt`
    async fn insert(&self, event: &PurchaseEvent) -> Result<PurchaseRecord, StoreError>;

    /// All records of a user in insertion order; empty for unknown users
    async fn find_by_user(&self, user_id: &str) -> Result<Vec<PurchaseRecord>, StoreError>;

    /// Most recent records first, at most `limit`
    async fn find_all(&self, limit: i64) -> Result<Vec<PurchaseRecord>, StoreError>;

    /// Round trip used by the health check
    async fn ping(&self) -> Result<(), StoreError>;
}
