use thiserror::Error;

/// Reasons a purchase event is rejected, either before publishing or when decoding
#[derive(Debug, Error)]
pub enum EventError {
    #[error("event payload is empty")]
    EmptyPayload,

    #[error("event payload is not valid JSON for a purchase event: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("userId must not be empty")]
    EmptyUserId,

    #[error("price must be a finite, non-negative number (got {0})")]
    InvalidPrice(f64),

    #[error("timestamp is not an ISO-8601 date-time: {0:?}")]
    InvalidTimestamp(String),

    #[error("unexpected eventType {0:?}")]
    UnexpectedEventType(String),
}
