//! Purchase Service - Main entry point
//!
//! # Modes
//! - `all` (default): gateway and ledger in one process
//! - `gateway`: `POST /buy` plus the read-through to the ledger API
//! - `ledger`: consumer workers plus the query API
//!
//! The mode comes from `RUN_MODE` and can be overridden with `--mode <mode>`.

use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use db_pool::{create_lazy_pool, create_pool, DbConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use purchase_service::broker::{EventSource, KafkaEventSink, KafkaEventSource};
use purchase_service::consumer::WorkerConfig;
use purchase_service::health::{ConsumerHealthCheck, PublisherHealthCheck, StoreHealthCheck};
use purchase_service::ledger_client::LedgerClient;
use purchase_service::store::{PgPurchaseStore, PurchaseStore};
use purchase_service::{
    handlers, AppState, Config, ConsumerPool, HealthMonitor, Publisher, PublisherConfig,
    QueryService,
};
use resilience::RetryConfig;

const PRODUCER_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,purchase_service=debug,rdkafka=warn".into());

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = terminate.recv() => {},
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to listen for Ctrl+C: {}", e);
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
    }
}

fn worker_config(config: &Config) -> WorkerConfig {
    let store_retry = RetryConfig {
        max_retries: config.store_max_retries,
        initial_backoff: Duration::from_millis(config.store_initial_backoff_ms),
        max_backoff: Duration::from_millis(config.store_max_backoff_ms),
        backoff_multiplier: 2.0,
        jitter: true,
    };

    WorkerConfig {
        poll_timeout: config.poll_timeout(),
        drain_timeout: config.drain_timeout(),
        write_timeout: config.store_write_timeout(),
        pause_backoff: RetryConfig {
            initial_backoff: Duration::from_secs(1).min(store_retry.max_backoff),
            ..store_retry.clone()
        },
        store_retry,
    }
}

#[actix_web::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let loaded = Config::from_env();
    init_tracing(loaded.as_ref().map(|c| c.json_logs()).unwrap_or(false));

    let config = loaded.map_err(|e| {
        error!("Failed to load configuration: {}", e);
        anyhow::anyhow!("Configuration error: {}", e)
    })?;
    config.validate().map_err(|e| {
        error!("Invalid configuration: {}", e);
        anyhow::anyhow!("Configuration error: {}", e)
    })?;

    let mode = config.run_mode;
    info!(
        mode = ?mode,
        brokers = %config.kafka_bootstrap_servers,
        topic = %config.kafka_topic,
        group_id = %config.kafka_group_id,
        "Starting purchase service"
    );

    let mut health = HealthMonitor::new(config.health_check_timeout());

    // Gateway: publisher
    let publisher = if mode.runs_gateway() {
        let sink = KafkaEventSink::new(
            &config.kafka_bootstrap_servers,
            &config.kafka_topic,
            config.publish_timeout(),
        )
        .context("Failed to create Kafka producer")?;

        let publisher = Arc::new(Publisher::new(
            Arc::new(sink),
            PublisherConfig::new(
                config.kafka_topic.clone(),
                config.publish_timeout(),
                config.publish_max_retries,
            ),
        ));
        health = health.with_publisher(Arc::new(PublisherHealthCheck::new(
            publisher.clone(),
            config.health_check_timeout(),
        )));
        Some(publisher)
    } else {
        None
    };

    // Ledger: store, consumer workers, queries
    let (query, consumers) = if mode.runs_ledger() {
        let db_config = DbConfig::for_ledger(
            mode.service_name(),
            config.database_url.clone(),
            config.consumer_workers,
        );
        db_config.log_config();

        // Only a bad DATABASE_URL is fatal; workers pause until an unreachable store recovers
        let pool = match create_pool(db_config.clone()).await {
            Ok(pool) => pool,
            Err(e) => {
                error!(error = %e, "Database unavailable at startup, continuing without it");
                create_lazy_pool(db_config).context("Invalid database configuration")?
            }
        };
        let pg_store = PgPurchaseStore::new(pool);
        if let Err(e) = pg_store.ensure_schema().await {
            warn!(error = %e, "Database migrations deferred until the store is reachable");
        }

        let store: Arc<dyn PurchaseStore> = Arc::new(pg_store);

        let consumers = ConsumerPool::spawn(
            config.consumer_workers,
            store.clone(),
            worker_config(&config),
            |_| {
                KafkaEventSource::new(
                    &config.kafka_bootstrap_servers,
                    &config.kafka_group_id,
                    &config.kafka_topic,
                )
                .map(|source| Box::new(source) as Box<dyn EventSource>)
            },
        );
        if consumers.running() == 0 {
            anyhow::bail!("No consumer worker could join group {}", config.kafka_group_id);
        }

        health = health
            .with_store(Arc::new(StoreHealthCheck::new(store.clone())))
            .with_consumer(Arc::new(ConsumerHealthCheck::new(
                consumers.statuses(),
                config.consumer_stale_after(),
            )));

        let query = QueryService::new(store, config.recent_default_limit, config.recent_max_limit);
        (Some(query), Some(consumers))
    } else {
        (None, None)
    };

    let mut state = AppState::new(config.clone(), health);
    if let Some(publisher) = &publisher {
        state = state.with_publisher(publisher.clone());
    }
    if let Some(query) = query {
        state = state.with_query(query);
    } else if mode.runs_gateway() {
        let client = LedgerClient::new(
            &config.customer_api_url,
            resilience::http_internal_config().timeout.duration,
        )
        .context("Failed to create ledger API client")?;
        state = state.with_ledger_client(client);
    }

    let bind_address = format!("0.0.0.0:{}", config.port);
    info!("Starting HTTP server on {}", bind_address);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(tracing_actix_web::TracingLogger::default())
            .configure(handlers::configure(mode))
    })
    .bind(&bind_address)
    .with_context(|| format!("Failed to bind {}", bind_address))?
    .disable_signals()
    .run();

    let server_handle = server.handle();
    let mut server_task = actix_rt::spawn(server);

    tokio::select! {
        result = &mut server_task => {
            match result {
                Ok(Ok(())) => info!("HTTP server stopped"),
                Ok(Err(e)) => error!("HTTP server error: {}", e),
                Err(e) => error!("HTTP server task failed: {}", e),
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping HTTP server");
            server_handle.stop(true).await;
        }
    }

    if let Some(consumers) = consumers {
        consumers
            .shutdown(config.drain_timeout() + Duration::from_secs(1))
            .await;
    }

    if let Some(publisher) = publisher {
        match publisher.flush(PRODUCER_FLUSH_TIMEOUT).await {
            Ok(()) => info!("Kafka producer flushed"),
            Err(e) => error!("Error flushing Kafka producer: {}", e),
        }
    }

    info!("Purchase service shut down");
    Ok(())
}
