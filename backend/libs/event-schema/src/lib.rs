//! Event schema for the purchase pipeline topic
//!
//! Defines the wire format published by the gateway and consumed by the ledger, and the
//! persisted record shape served by the query API. Decoding is always validated: a payload
//! either becomes a `PurchaseEvent` or a typed `EventError`, never a partially filled value.
mod error;
mod purchase;
mod record;

pub use error::EventError;
pub use purchase::{EventType, PurchaseEvent, PURCHASE_REQUEST};
pub use record::PurchaseRecord;
