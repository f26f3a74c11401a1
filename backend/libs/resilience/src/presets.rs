//! Preset configurations for the dependencies of the purchase pipeline
use crate::retry::RetryConfig;
use crate::timeout::TimeoutConfig;
use std::time::Duration;

/// Configuration bundle for a dependency type
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub timeout: TimeoutConfig,
    pub retry: Option<RetryConfig>,
}

/// Kafka producer operations
///
/// - Timeout: 10s per acknowledged send
/// - Retry: 3 attempts (producer is idempotent, duplicates tolerated downstream)
pub fn kafka_producer_config() -> ServiceConfig {
    ServiceConfig {
        timeout: TimeoutConfig::from_secs(10),
        retry: Some(RetryConfig {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            jitter: true,
        }),
    }
}

/// Store writes issued by the consumer
///
/// - Timeout: 5s per insert
/// - Retry: 5 attempts per round; the consumer keeps the offset while retrying
pub fn store_write_config() -> ServiceConfig {
    ServiceConfig {
        timeout: TimeoutConfig::from_secs(5),
        retry: Some(RetryConfig {
            max_retries: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: true,
        }),
    }
}

/// Store reads serving the query API
///
/// - Timeout: 5s
/// - No retry (read errors are surfaced to the caller)
pub fn store_read_config() -> ServiceConfig {
    ServiceConfig {
        timeout: TimeoutConfig::from_secs(5),
        retry: None,
    }
}

/// Internal HTTP calls between the gateway and the ledger API
///
/// - Timeout: 5s
/// - No retry (the gateway falls back to an empty result)
pub fn http_internal_config() -> ServiceConfig {
    ServiceConfig {
        timeout: TimeoutConfig::from_secs(5),
        retry: None,
    }
}
