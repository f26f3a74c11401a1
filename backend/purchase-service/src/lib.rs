//! Purchase Service - asynchronous purchase-event pipeline
//!
//! This service provides:
//! - Gateway: validates purchase submissions and publishes them to a partitioned topic
//! - Ledger: consumer-group workers that persist events with at-least-once delivery
//! - Query API over the persisted purchases
//! - Aggregated health of the store, the consumers and the publisher

pub mod app_state;
pub mod background;
pub mod broker;
pub mod config;
pub mod consumer;
pub mod error;
pub mod handlers;
pub mod health;
pub mod ledger_client;
pub mod publisher;
pub mod query;
pub mod store;

pub use app_state::AppState;
pub use background::ConsumerPool;
pub use config::{Config, ConfigError, RunMode};
pub use error::{AppError, Result};
pub use health::{ComponentStatus, HealthMonitor, HealthReport};
pub use publisher::{Ack, BuyRequest, PublishError, Publisher, PublisherConfig};
pub use query::{QueryError, QueryService};
