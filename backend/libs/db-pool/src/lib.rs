//! PostgreSQL pool for the purchase ledger
//!
//! Pool size follows the ledger's load: every consumer worker holds at most one
//! connection for its in-flight insert, and the query API and the health check share the
//! remaining headroom. All values can be overridden through `DB_*` environment variables.

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::Connection;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Connections reserved for queries and health checks on top of the workers
const QUERY_HEADROOM: u32 = 4;

#[derive(Clone)]
pub struct DbConfig {
    /// Reported to PostgreSQL as `application_name`
    pub service_name: String,
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// Bound on opening a connection and on the startup round trip
    pub connect_timeout: Duration,
    /// Bound on waiting for a free pooled connection
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

// The URL may carry credentials
impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("service_name", &self.service_name)
            .field("database_url", &"[REDACTED]")
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .field("connect_timeout", &self.connect_timeout)
            .field("acquire_timeout", &self.acquire_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .field("max_lifetime", &self.max_lifetime)
            .finish()
    }
}

impl DbConfig {
    /// Pool settings for a ledger process running `consumer_workers` workers
    pub fn for_ledger(
        service_name: &str,
        database_url: impl Into<String>,
        consumer_workers: usize,
    ) -> Self {
        let workers = u32::try_from(consumer_workers).unwrap_or(u32::MAX);
        let max = workers.saturating_add(QUERY_HEADROOM);
        let min = workers.clamp(1, max);

        Self {
            service_name: service_name.to_string(),
            database_url: database_url.into(),
            max_connections: env_or("DB_MAX_CONNECTIONS", max),
            min_connections: env_or("DB_MIN_CONNECTIONS", min),
            connect_timeout: Duration::from_secs(env_or("DB_CONNECT_TIMEOUT_SECS", 5)),
            acquire_timeout: Duration::from_secs(env_or("DB_ACQUIRE_TIMEOUT_SECS", 5)),
            idle_timeout: Duration::from_secs(env_or("DB_IDLE_TIMEOUT_SECS", 600)),
            max_lifetime: Duration::from_secs(env_or("DB_MAX_LIFETIME_SECS", 1800)),
        }
    }

    pub fn log_config(&self) {
        info!(
            service = %self.service_name,
            max_connections = self.max_connections,
            min_connections = self.min_connections,
            connect_timeout = ?self.connect_timeout,
            acquire_timeout = ?self.acquire_timeout,
            "Database pool configuration"
        );
    }
}

/// Missing or unparsable values fall back to `default`
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn connect_options(config: &DbConfig) -> Result<PgConnectOptions, sqlx::Error> {
    Ok(PgConnectOptions::from_str(&config.database_url)?.application_name(&config.service_name))
}

fn pool_options(config: &DbConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections.min(config.max_connections))
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .max_lifetime(config.max_lifetime)
        .test_before_acquire(true)
}

/// Open the pool and check the server answers before any worker starts
pub async fn create_pool(config: DbConfig) -> Result<PgPool, sqlx::Error> {
    let options = connect_options(&config)?;

    debug!(service = %config.service_name, "Connecting to PostgreSQL");

    let pool = pool_options(&config).connect_with(options).await?;

    let verified = tokio::time::timeout(config.connect_timeout, async {
        let mut conn = pool.acquire().await?;
        conn.ping().await
    })
    .await;

    match verified {
        Ok(Ok(())) => {
            info!(service = %config.service_name, "Database pool ready");
            Ok(pool)
        }
        Ok(Err(e)) => {
            error!(service = %config.service_name, error = %e, "Database check failed");
            Err(e)
        }
        Err(_) => {
            error!(
                service = %config.service_name,
                timeout = ?config.connect_timeout,
                "Database check timed out"
            );
            Err(sqlx::Error::PoolTimedOut)
        }
    }
}

/// Pool that opens connections on first use.
///
/// Only a malformed URL fails here; an unreachable server surfaces on the first query.
pub fn create_lazy_pool(config: DbConfig) -> Result<PgPool, sqlx::Error> {
    let options = connect_options(&config)?;
    warn!(service = %config.service_name, "Database pool created without a startup check");
    Ok(pool_options(&config).connect_lazy_with(options))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const OVERRIDES: [&str; 6] = [
        "DB_MAX_CONNECTIONS",
        "DB_MIN_CONNECTIONS",
        "DB_CONNECT_TIMEOUT_SECS",
        "DB_ACQUIRE_TIMEOUT_SECS",
        "DB_IDLE_TIMEOUT_SECS",
        "DB_MAX_LIFETIME_SECS",
    ];

    fn clear_overrides() {
        for key in OVERRIDES {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_pool_grows_with_workers() {
        clear_overrides();

        let single = DbConfig::for_ledger("purchase-ledger", "postgres://localhost/purchases", 1);
        assert_eq!(single.max_connections, 1 + QUERY_HEADROOM);
        assert_eq!(single.min_connections, 1);
        assert_eq!(single.database_url, "postgres://localhost/purchases");

        let four = DbConfig::for_ledger("purchase-ledger", "", 4);
        assert_eq!(four.max_connections, 4 + QUERY_HEADROOM);
        assert_eq!(four.min_connections, 4);
        assert_eq!(four.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_overrides();
        std::env::set_var("DB_MAX_CONNECTIONS", " 40 ");
        std::env::set_var("DB_ACQUIRE_TIMEOUT_SECS", "not-a-number");

        let config = DbConfig::for_ledger("purchase-service", "", 2);
        assert_eq!(config.max_connections, 40);
        assert_eq!(config.acquire_timeout, Duration::from_secs(5));

        clear_overrides();
    }

    #[test]
    fn test_debug_redacts_url() {
        let config = DbConfig::for_ledger("purchase-ledger", "postgres://user:secret@db/purchases", 1);
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[tokio::test]
    async fn test_lazy_pool_does_not_connect() {
        let mut config = DbConfig::for_ledger("purchase-ledger", "postgres://ledger@127.0.0.1:1/purchases", 1);
        config.acquire_timeout = Duration::from_millis(200);

        let pool = create_lazy_pool(config).unwrap();
        assert_eq!(pool.size(), 0);
        assert!(pool.acquire().await.is_err());
    }

    #[test]
    fn test_lazy_pool_rejects_malformed_url() {
        let config = DbConfig::for_ledger("purchase-ledger", "not a database url", 1);
        assert!(create_lazy_pool(config).is_err());
    }
}
