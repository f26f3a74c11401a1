use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_schema::{EventType, PurchaseEvent, PurchaseRecord};
use sqlx::{FromRow, PgPool};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};
use uuid::Uuid;

use super::{PurchaseStore, StoreError};

/// PostgreSQL-backed purchase store
#[derive(Clone)]
pub struct PgPurchaseStore {
    pool: PgPool,
    /// Set once the bundled migrations have been applied
    schema: Arc<OnceCell<()>>,
}

#[derive(Debug, FromRow)]
struct PurchaseRow {
    id: Uuid,
    user_id: String,
    username: String,
    price: f64,
    timestamp: String,
    event_type: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<PurchaseRow> for PurchaseRecord {
    type Error = StoreError;

    fn try_from(row: PurchaseRow) -> Result<Self, Self::Error> {
        let event_type = EventType::parse(&row.event_type)
            .map_err(|e| StoreError::Rejected(format!("row {}: {}", row.id, e)))?;

        Ok(PurchaseRecord {
            id: row.id,
            user_id: row.user_id,
            username: row.username,
            price: row.price,
            timestamp: row.timestamp,
            event_type,
            created_at: row.created_at,
        })
    }
}

impl PgPurchaseStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            schema: Arc::new(OnceCell::new()),
        }
    }

    /// Apply the bundled schema migrations unless that already succeeded.
    ///
    /// Every store call goes through here first, so a database that was down at startup
    /// gets its schema on the first call after it recovers. Until then calls fail as
    /// unavailable and are retried, never rejected.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        self.schema
            .get_or_try_init(|| async {
                sqlx::migrate!("./migrations")
                    .run(&self.pool)
                    .await
                    .map_err(|e| StoreError::Unavailable(format!("schema not ready: {}", e)))?;
                info!("Database migrations applied");
                Ok::<(), StoreError>(())
            })
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl PurchaseStore for PgPurchaseStore {
    async fn insert(&self, event: &PurchaseEvent) -> Result<PurchaseRecord, StoreError> {
        self.ensure_schema().await?;

        let id = Uuid::new_v4();

        let created_at: DateTime<Utc> = sqlx::query_scalar(
            r#"
            INSERT INTO purchases (id, user_id, username, price, "timestamp", event_type)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING created_at
            "#,
        )
        .bind(id)
        .bind(event.user_id())
        .bind(event.username())
        .bind(event.price())
        .bind(event.timestamp())
        .bind(event.event_type().as_str())
        .fetch_one(&self.pool)
        .await?;

        debug!(user_id = %event.user_id(), purchase_id = %id, "Purchase record inserted");

        Ok(PurchaseRecord::from_event(event, id, created_at))
    }

    async fn find_by_user(&self, user_id: &str) -> Result<Vec<PurchaseRecord>, StoreError> {
        self.ensure_schema().await?;
        let rows = sqlx::query_as::<_, PurchaseRow>(
            r#"
            SELECT id, user_id, username, price, "timestamp", event_type, created_at
            FROM purchases
            WHERE user_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PurchaseRecord::try_from).collect()
    }

    async fn find_all(&self, limit: i64) -> Result<Vec<PurchaseRecord>, StoreError> {
        self.ensure_schema().await?;
        let rows = sqlx::query_as::<_, PurchaseRow>(
            r#"
            SELECT id, user_id, username, price, "timestamp", event_type, created_at
            FROM purchases
            ORDER BY seq DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PurchaseRecord::try_from).collect()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.ensure_schema().await?;
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
