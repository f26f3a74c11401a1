use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::EventError;

/// The only event type carried on the purchase topic
pub const PURCHASE_REQUEST: &str = "purchase_request";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EventType {
    #[default]
    #[serde(rename = "purchase_request")]
    PurchaseRequest,
}

impl EventType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            EventType::PurchaseRequest => PURCHASE_REQUEST,
        }
    }

    pub fn parse(value: &str) -> Result<Self, EventError> {
        match value {
            PURCHASE_REQUEST => Ok(EventType::PurchaseRequest),
            other => Err(EventError::UnexpectedEventType(other.to_string())),
        }
    }
}

/// A purchase submitted by a client.
///
/// Wire format (topic message value, key = `userId`):
/// ```json
/// {
///   "userId": "u1",
///   "username": "jdoe",
///   "price": 9.99,
///   "timestamp": "2024-01-01T00:00:00Z",
///   "eventType": "purchase_request"
/// }
/// ```
///
/// Fields are private: every value of this type went through validation and is never
/// modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "WirePurchaseEvent")]
pub struct PurchaseEvent {
    user_id: String,
    username: String,
    price: f64,
    timestamp: String,
    event_type: EventType,
}

/// Unvalidated shape of the JSON payload
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePurchaseEvent {
    user_id: String,
    username: String,
    price: f64,
    timestamp: String,
    #[serde(default)]
    event_type: Option<String>,
}

impl TryFrom<WirePurchaseEvent> for PurchaseEvent {
    type Error = EventError;

    fn try_from(wire: WirePurchaseEvent) -> Result<Self, Self::Error> {
        // A missing eventType is treated as a purchase request
        let event_type = match wire.event_type.as_deref() {
            None => EventType::PurchaseRequest,
            Some(value) => EventType::parse(value)?,
        };

        Self::build(wire.user_id, wire.username, wire.price, wire.timestamp, event_type)
    }
}

impl PurchaseEvent {
    /// Build a validated purchase request event
    pub fn new(
        user_id: impl Into<String>,
        username: impl Into<String>,
        price: f64,
        timestamp: impl Into<String>,
    ) -> Result<Self, EventError> {
        Self::build(
            user_id.into(),
            username.into(),
            price,
            timestamp.into(),
            EventType::PurchaseRequest,
        )
    }

    fn build(
        user_id: String,
        username: String,
        price: f64,
        timestamp: String,
        event_type: EventType,
    ) -> Result<Self, EventError> {
        if user_id.trim().is_empty() {
            return Err(EventError::EmptyUserId);
        }

        if !price.is_finite() || price < 0.0 {
            return Err(EventError::InvalidPrice(price));
        }

        if !is_iso8601(&timestamp) {
            return Err(EventError::InvalidTimestamp(timestamp));
        }

        Ok(Self {
            user_id,
            username,
            price,
            timestamp,
            event_type,
        })
    }

    /// Decode a topic payload into a validated event
    pub fn decode(payload: &[u8]) -> Result<Self, EventError> {
        if payload.is_empty() {
            return Err(EventError::EmptyPayload);
        }

        let wire: WirePurchaseEvent = serde_json::from_slice(payload)?;
        Self::try_from(wire)
    }

    /// Serialize to the topic payload
    pub fn encode(&self) -> Result<Vec<u8>, EventError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Partition key: all events of one user go to one partition
    pub fn partition_key(&self) -> &str {
        &self.user_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn price(&self) -> f64 {
        self.price
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }
}

/// RFC 3339 (`2024-01-01T00:00:00Z`) or a zone-less ISO-8601 date-time
/// (`2024-01-01T00:00:00.123456`)
fn is_iso8601(value: &str) -> bool {
    DateTime::parse_from_rfc3339(value).is_ok()
        || NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
}
