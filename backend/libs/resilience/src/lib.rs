//! Resilience patterns for the purchase pipeline
//!
//! This library provides the failure-handling primitives shared by the gateway and the
//! consumer:
//! - **Timeout**: Enforces time limits on broker sends, store calls and health probes
//! - **Retry**: Exponential backoff with jitter for transient failures
//! - **Backoff**: Capped delay sequence for long pauses (store outages)
//! - **Preset Configurations**: Pre-tuned settings for Kafka, the store and internal HTTP
//!
//! # Example: Store Write with Retry
//!
//! ```rust,no_run
//! use resilience::{presets, with_retry_if};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = presets::store_write_config();
//!
//!     let result = with_retry_if(
//!         config.retry.unwrap_or_default(),
//!         |e: &String| e.contains("connection"),
//!         || async {
//!             // Your insert here
//!             Ok::<_, String>(())
//!         },
//!     )
//!     .await;
//! }
//! ```

pub mod presets;
pub mod retry;
pub mod timeout;

// Re-export main types for convenience
pub use presets::{
    http_internal_config, kafka_producer_config, store_read_config, store_write_config,
    ServiceConfig,
};
pub use retry::{with_retry, with_retry_if, Backoff, RetryConfig, RetryError};
pub use timeout::{with_timeout_result, TimeoutConfig, TimeoutError};
