//! Process-wide state shared by the HTTP handlers and the background workers
use std::sync::Arc;

use crate::config::{Config, RunMode};
use crate::health::HealthMonitor;
use crate::ledger_client::LedgerClient;
use crate::publisher::Publisher;
use crate::query::QueryService;

/// Built once in `main`; components that the run mode disables are `None`
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub publisher: Option<Arc<Publisher>>,
    pub query: Option<QueryService>,
    pub ledger_client: Option<LedgerClient>,
    pub health: HealthMonitor,
}

impl AppState {
    pub fn new(config: Config, health: HealthMonitor) -> Self {
        Self {
            config: Arc::new(config),
            publisher: None,
            query: None,
            ledger_client: None,
            health,
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_query(mut self, query: QueryService) -> Self {
        self.query = Some(query);
        self
    }

    pub fn with_ledger_client(mut self, client: LedgerClient) -> Self {
        self.ledger_client = Some(client);
        self
    }

    pub fn run_mode(&self) -> RunMode {
        self.config.run_mode
    }

    pub fn service_name(&self) -> &'static str {
        self.config.run_mode.service_name()
    }
}
