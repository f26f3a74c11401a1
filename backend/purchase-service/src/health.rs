//! Health aggregation for the store, the consumer workers and the publisher
//!
//! Every signal is checked concurrently under its own timeout. A check that fails or
//! times out only lowers its own signal; `overall` is the worst signal enabled in the
//! running mode.
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::consumer::ConsumerStatus;
use crate::publisher::Publisher;
use crate::store::PurchaseStore;

/// Ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ComponentStatus {
    Ok,
    Degraded,
    Down,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ComponentHealth {
    pub fn ok() -> Self {
        Self {
            status: ComponentStatus::Ok,
            detail: None,
        }
    }

    pub fn degraded(detail: impl Into<String>) -> Self {
        Self {
            status: ComponentStatus::Degraded,
            detail: Some(detail.into()),
        }
    }

    pub fn down(detail: impl Into<String>) -> Self {
        Self {
            status: ComponentStatus::Down,
            detail: Some(detail.into()),
        }
    }
}

/// One liveness signal
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self) -> ComponentHealth;

    /// Status reported when `check` does not finish in time
    fn on_timeout(&self) -> ComponentStatus {
        ComponentStatus::Down
    }
}

/// Store round trip
pub struct StoreHealthCheck {
    store: Arc<dyn PurchaseStore>,
}

impl StoreHealthCheck {
    pub fn new(store: Arc<dyn PurchaseStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl HealthCheck for StoreHealthCheck {
    async fn check(&self) -> ComponentHealth {
        match self.store.ping().await {
            Ok(()) => ComponentHealth::ok(),
            Err(e) => ComponentHealth::down(e.to_string()),
        }
    }
}

/// Derived from the worker status records
pub struct ConsumerHealthCheck {
    workers: Vec<Arc<ConsumerStatus>>,
    stale_after: Duration,
}

impl ConsumerHealthCheck {
    pub fn new(workers: Vec<Arc<ConsumerStatus>>, stale_after: Duration) -> Self {
        Self {
            workers,
            stale_after,
        }
    }

    fn worker_health(&self, status: &ConsumerStatus) -> ComponentHealth {
        let snapshot = status.snapshot();

        if !snapshot.state.is_running() {
            return ComponentHealth::down(format!(
                "worker {} is {:?}",
                snapshot.worker_id, snapshot.state
            ));
        }
        if snapshot.paused {
            return ComponentHealth::degraded(format!(
                "worker {} paused on store failure",
                snapshot.worker_id
            ));
        }

        // Before the first commit or idle poll, measure from startup
        let since_progress = snapshot.since_progress.or(snapshot.since_start);
        match since_progress {
            Some(elapsed) if elapsed > self.stale_after => ComponentHealth::degraded(format!(
                "worker {} made no progress for {}s",
                snapshot.worker_id,
                elapsed.as_secs()
            )),
            _ => ComponentHealth::ok(),
        }
    }
}

#[async_trait]
impl HealthCheck for ConsumerHealthCheck {
    async fn check(&self) -> ComponentHealth {
        if self.workers.is_empty() {
            return ComponentHealth::down("no consumer workers");
        }

        let results: Vec<ComponentHealth> =
            self.workers.iter().map(|w| self.worker_health(w)).collect();

        if results.iter().all(|r| r.status == ComponentStatus::Down) {
            return ComponentHealth::down(join_details(&results));
        }

        // Some workers still consume: a stopped one only degrades the signal
        if results.iter().all(|r| r.status == ComponentStatus::Ok) {
            ComponentHealth::ok()
        } else {
            ComponentHealth::degraded(join_details(&results))
        }
    }

    fn on_timeout(&self) -> ComponentStatus {
        ComponentStatus::Degraded
    }
}

fn join_details(results: &[ComponentHealth]) -> String {
    results
        .iter()
        .filter_map(|r| r.detail.as_deref())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Broker metadata probe plus the outcome of the last send
pub struct PublisherHealthCheck {
    publisher: Arc<Publisher>,
    probe_timeout: Duration,
}

impl PublisherHealthCheck {
    pub fn new(publisher: Arc<Publisher>, probe_timeout: Duration) -> Self {
        Self {
            publisher,
            probe_timeout,
        }
    }
}

#[async_trait]
impl HealthCheck for PublisherHealthCheck {
    async fn check(&self) -> ComponentHealth {
        if let Err(e) = self.publisher.sink().probe(self.probe_timeout).await {
            return ComponentHealth::down(e.to_string());
        }

        match self.publisher.last_outcome() {
            Some(outcome) if !outcome.succeeded => ComponentHealth::degraded(format!(
                "last publish failed {}s ago",
                outcome.at.elapsed().as_secs()
            )),
            _ => ComponentHealth::ok(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub overall: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<ComponentHealth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumer: Option<ComponentHealth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<ComponentHealth>,
}

/// Aggregates the signals enabled in the running mode
#[derive(Clone, Default)]
pub struct HealthMonitor {
    store: Option<Arc<dyn HealthCheck>>,
    consumer: Option<Arc<dyn HealthCheck>>,
    publisher: Option<Arc<dyn HealthCheck>>,
    timeout: Duration,
}

impl HealthMonitor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    pub fn with_store(mut self, check: Arc<dyn HealthCheck>) -> Self {
        self.store = Some(check);
        self
    }

    pub fn with_consumer(mut self, check: Arc<dyn HealthCheck>) -> Self {
        self.consumer = Some(check);
        self
    }

    pub fn with_publisher(mut self, check: Arc<dyn HealthCheck>) -> Self {
        self.publisher = Some(check);
        self
    }

    pub async fn report(&self) -> HealthReport {
        let (store, consumer, publisher) = tokio::join!(
            run_check("store", self.store.as_deref(), self.timeout),
            run_check("consumer", self.consumer.as_deref(), self.timeout),
            run_check("publisher", self.publisher.as_deref(), self.timeout),
        );

        let overall = [&store, &consumer, &publisher]
            .into_iter()
            .flatten()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Ok);

        HealthReport {
            overall,
            store,
            consumer,
            publisher,
        }
    }
}

async fn run_check(
    name: &str,
    check: Option<&dyn HealthCheck>,
    timeout: Duration,
) -> Option<ComponentHealth> {
    let check = check?;

    match tokio::time::timeout(timeout, check.check()).await {
        Ok(health) => {
            if health.status != ComponentStatus::Ok {
                warn!(component = name, status = ?health.status, detail = ?health.detail, "Health check not OK");
            }
            Some(health)
        }
        Err(_) => {
            warn!(component = name, ?timeout, "Health check timed out");
            Some(ComponentHealth {
                status: check.on_timeout(),
                detail: Some(format!("check timed out after {:?}", timeout)),
            })
        }
    }
}
