use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::purchase::{EventType, PurchaseEvent};

/// A purchase as persisted by the ledger: the event fields plus a store-assigned `id`
/// and the server time of the successful insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRecord {
    pub id: Uuid,
    pub user_id: String,
    pub username: String,
    pub price: f64,
    pub timestamp: String,
    pub event_type: EventType,
    pub created_at: DateTime<Utc>,
}

impl PurchaseRecord {
    pub fn from_event(event: &PurchaseEvent, id: Uuid, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id: event.user_id().to_string(),
            username: event.username().to_string(),
            price: event.price(),
            timestamp: event.timestamp().to_string(),
            event_type: event.event_type(),
            created_at,
        }
    }
}
