//! Configuration for the purchase service, loaded from environment variables
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Which halves of the pipeline this process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Gateway and ledger in one process
    #[default]
    All,
    /// `POST /buy` and the read-through proxy; no database
    Gateway,
    /// Consumer workers and the query API
    Ledger,
}

impl RunMode {
    pub fn runs_gateway(&self) -> bool {
        matches!(self, RunMode::All | RunMode::Gateway)
    }

    pub fn runs_ledger(&self) -> bool {
        matches!(self, RunMode::All | RunMode::Ledger)
    }

    /// Name used for the `service` field of the health report and for pool sizing
    pub fn service_name(&self) -> &'static str {
        match self {
            RunMode::All => "purchase-service",
            RunMode::Gateway => "purchase-gateway",
            RunMode::Ledger => "purchase-ledger",
        }
    }

    /// `--mode <all|gateway|ledger>` from the command line, if given
    pub fn from_args<I>(args: I) -> Option<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let args: Vec<String> = args.into_iter().collect();

        for i in 0..args.len() {
            if args[i] == "--mode" && i + 1 < args.len() {
                return match args[i + 1].parse() {
                    Ok(mode) => Some(mode),
                    Err(_) => {
                        warn!("Unknown mode '{}', keeping configured mode", args[i + 1]);
                        None
                    }
                };
            }
        }

        None
    }
}

impl FromStr for RunMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(RunMode::All),
            "gateway" => Ok(RunMode::Gateway),
            "ledger" => Ok(RunMode::Ledger),
            other => Err(ConfigError::Invalid(format!("unknown run mode '{}'", other))),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read environment: {0}")]
    Env(#[from] envy::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration struct
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Kafka broker addresses
    #[serde(default = "default_kafka_bootstrap_servers")]
    pub kafka_bootstrap_servers: String,

    /// Purchase events topic
    #[serde(default = "default_kafka_topic")]
    pub kafka_topic: String,

    /// Consumer group shared by all ledger workers
    #[serde(default = "default_kafka_group_id")]
    pub kafka_group_id: String,

    /// PostgreSQL connection URL (required when the ledger runs)
    #[serde(default)]
    pub database_url: String,

    /// HTTP port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Base URL of the ledger API, used by the gateway read-through
    #[serde(default = "default_customer_api_url")]
    pub customer_api_url: String,

    #[serde(default)]
    pub run_mode: RunMode,

    // ============================================
    // Publisher
    // ============================================
    /// Per-attempt acknowledgment timeout
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,

    /// Retries after the first send attempt
    #[serde(default = "default_publish_max_retries")]
    pub publish_max_retries: u32,

    // ============================================
    // Consumer
    // ============================================
    /// Number of worker tasks joining the consumer group
    #[serde(default = "default_consumer_workers")]
    pub consumer_workers: usize,

    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Bound on finishing the in-flight message at shutdown
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,

    /// Consumer is reported degraded after this long without progress
    #[serde(default = "default_consumer_stale_after_secs")]
    pub consumer_stale_after_secs: u64,

    /// Store write retries within one round before the partition is paused
    #[serde(default = "default_store_max_retries")]
    pub store_max_retries: u32,

    #[serde(default = "default_store_initial_backoff_ms")]
    pub store_initial_backoff_ms: u64,

    /// Upper bound for both retry backoff and pause cooldown
    #[serde(default = "default_store_max_backoff_ms")]
    pub store_max_backoff_ms: u64,

    /// Per-attempt insert timeout; an elapsed attempt counts as a transient failure
    #[serde(default = "default_store_write_timeout_ms")]
    pub store_write_timeout_ms: u64,

    // ============================================
    // Health and queries
    // ============================================
    #[serde(default = "default_health_check_timeout_ms")]
    pub health_check_timeout_ms: u64,

    #[serde(default = "default_recent_limit")]
    pub recent_default_limit: i64,

    #[serde(default = "default_recent_max_limit")]
    pub recent_max_limit: i64,

    /// `json` for JSON log lines, anything else for plain text
    #[serde(default)]
    pub log_format: String,
}

fn default_kafka_bootstrap_servers() -> String {
    "localhost:9092".to_string()
}

fn default_kafka_topic() -> String {
    "purchase-events".to_string()
}

fn default_kafka_group_id() -> String {
    "customer-management-api".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_customer_api_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_publish_timeout_ms() -> u64 {
    10_000
}

fn default_publish_max_retries() -> u32 {
    3
}

fn default_consumer_workers() -> usize {
    1
}

fn default_poll_timeout_ms() -> u64 {
    1_000
}

fn default_drain_timeout_ms() -> u64 {
    10_000
}

fn default_consumer_stale_after_secs() -> u64 {
    60
}

fn default_store_max_retries() -> u32 {
    5
}

fn default_store_initial_backoff_ms() -> u64 {
    200
}

fn default_store_max_backoff_ms() -> u64 {
    10_000
}

fn default_store_write_timeout_ms() -> u64 {
    resilience::store_write_config().timeout.duration.as_millis() as u64
}

fn default_health_check_timeout_ms() -> u64 {
    2_000
}

fn default_recent_limit() -> i64 {
    100
}

fn default_recent_max_limit() -> i64 {
    1000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kafka_bootstrap_servers: default_kafka_bootstrap_servers(),
            kafka_topic: default_kafka_topic(),
            kafka_group_id: default_kafka_group_id(),
            database_url: String::new(),
            port: default_port(),
            customer_api_url: default_customer_api_url(),
            run_mode: RunMode::default(),
            publish_timeout_ms: default_publish_timeout_ms(),
            publish_max_retries: default_publish_max_retries(),
            consumer_workers: default_consumer_workers(),
            poll_timeout_ms: default_poll_timeout_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
            consumer_stale_after_secs: default_consumer_stale_after_secs(),
            store_max_retries: default_store_max_retries(),
            store_initial_backoff_ms: default_store_initial_backoff_ms(),
            store_max_backoff_ms: default_store_max_backoff_ms(),
            store_write_timeout_ms: default_store_write_timeout_ms(),
            health_check_timeout_ms: default_health_check_timeout_ms(),
            recent_default_limit: default_recent_limit(),
            recent_max_limit: default_recent_max_limit(),
            log_format: String::new(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, then apply `--mode` if present
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config: Config = envy::from_env()?;
        if let Some(mode) = RunMode::from_args(env::args()) {
            config.run_mode = mode;
        }
        Ok(config)
    }

    /// Reject configurations the service cannot start with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.kafka_bootstrap_servers.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "KAFKA_BOOTSTRAP_SERVERS must not be empty".into(),
            ));
        }
        if self.kafka_topic.trim().is_empty() {
            return Err(ConfigError::Invalid("KAFKA_TOPIC must not be empty".into()));
        }

        if self.run_mode.runs_ledger() {
            if self.kafka_group_id.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "KAFKA_GROUP_ID must not be empty".into(),
                ));
            }
            if self.database_url.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "DATABASE_URL is required in {:?} mode",
                    self.run_mode
                )));
            }
            if self.consumer_workers == 0 {
                return Err(ConfigError::Invalid(
                    "CONSUMER_WORKERS must be at least 1".into(),
                ));
            }
        }

        let timeouts = [
            ("PUBLISH_TIMEOUT_MS", self.publish_timeout_ms),
            ("POLL_TIMEOUT_MS", self.poll_timeout_ms),
            ("DRAIN_TIMEOUT_MS", self.drain_timeout_ms),
            ("HEALTH_CHECK_TIMEOUT_MS", self.health_check_timeout_ms),
            ("STORE_INITIAL_BACKOFF_MS", self.store_initial_backoff_ms),
            ("STORE_MAX_BACKOFF_MS", self.store_max_backoff_ms),
            ("STORE_WRITE_TIMEOUT_MS", self.store_write_timeout_ms),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(format!("{} must be greater than 0", name)));
        }

        if self.recent_max_limit < 1 || self.recent_default_limit < 1 {
            return Err(ConfigError::Invalid(
                "RECENT_DEFAULT_LIMIT and RECENT_MAX_LIMIT must be at least 1".into(),
            ));
        }

        Ok(())
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn store_write_timeout(&self) -> Duration {
        Duration::from_millis(self.store_write_timeout_ms)
    }

    pub fn consumer_stale_after(&self) -> Duration {
        Duration::from_secs(self.consumer_stale_after_secs)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}
