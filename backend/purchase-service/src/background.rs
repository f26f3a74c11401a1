//! Background task management
//!
//! Spawns the consumer workers and stops them on shutdown: the stop is broadcast on a
//! watch channel, each worker gets the drain budget to finish its in-flight message, and
//! any worker still running after that is aborted.
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::broker::{BrokerError, EventSource};
use crate::consumer::{ConsumerStatus, ConsumerWorker, WorkerConfig};
use crate::store::PurchaseStore;

/// Handles of the running consumer workers
pub struct ConsumerPool {
    handles: Vec<(usize, JoinHandle<()>)>,
    statuses: Vec<Arc<ConsumerStatus>>,
    shutdown_tx: watch::Sender<bool>,
}

impl ConsumerPool {
    /// Spawn `count` workers, each joining the consumer group through `make_source`.
    ///
    /// A worker whose group member cannot be created is marked failed and not spawned.
    pub fn spawn<F>(
        count: usize,
        store: Arc<dyn PurchaseStore>,
        config: WorkerConfig,
        mut make_source: F,
    ) -> Self
    where
        F: FnMut(usize) -> Result<Box<dyn EventSource>, BrokerError>,
    {
        info!(workers = count, "Spawning purchase consumer workers");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handles = Vec::with_capacity(count);
        let mut statuses = Vec::with_capacity(count);

        for id in 0..count {
            let status = Arc::new(ConsumerStatus::new(id));
            statuses.push(status.clone());

            let source = match make_source(id) {
                Ok(source) => source,
                Err(e) => {
                    error!(worker = id, error = %e, "Failed to create consumer");
                    status.mark_failed(e.to_string());
                    continue;
                }
            };

            let worker = ConsumerWorker::new(
                id,
                source,
                store.clone(),
                status,
                config.clone(),
                shutdown_rx.clone(),
            );
            handles.push((id, tokio::spawn(worker.run())));
        }

        Self {
            handles,
            statuses,
            shutdown_tx,
        }
    }

    pub fn statuses(&self) -> Vec<Arc<ConsumerStatus>> {
        self.statuses.clone()
    }

    /// Workers that were actually started
    pub fn running(&self) -> usize {
        self.handles.len()
    }

    /// Request shutdown and wait up to `timeout` for the workers to drain
    pub async fn shutdown(self, timeout: Duration) {
        info!(workers = self.handles.len(), "Shutting down consumer workers...");

        if self.shutdown_tx.send(true).is_err() {
            warn!("All consumer workers already exited");
        }

        // Workers drain concurrently under one shared budget
        let waits = self.handles.into_iter().map(|(id, mut handle)| async move {
            match tokio::time::timeout(timeout, &mut handle).await {
                Ok(Ok(())) => info!(worker = id, "Consumer worker shut down gracefully"),
                Ok(Err(e)) => error!(worker = id, error = %e, "Consumer worker panicked"),
                Err(_) => {
                    warn!(worker = id, "Consumer worker did not shut down within timeout, aborting");
                    handle.abort();
                }
            }
        });
        futures::future::join_all(waits).await;

        info!("All consumer workers shut down");
    }
}
