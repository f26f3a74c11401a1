use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Lifecycle of a consumer worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Init,
    JoiningGroup,
    Polling,
    Processing,
    Committing,
    PausedOnStoreFailure,
    Draining,
    Stopped,
    Failed,
}

impl WorkerState {
    /// Still consuming or about to
    pub fn is_running(&self) -> bool {
        !matches!(
            self,
            WorkerState::Init | WorkerState::Stopped | WorkerState::Failed
        )
    }
}

#[derive(Debug)]
struct StatusInner {
    state: WorkerState,
    started_at: Option<Instant>,
    last_commit_at: Option<Instant>,
    last_idle_poll_at: Option<Instant>,
    paused_since: Option<Instant>,
    assignment: Vec<i32>,
    last_error: Option<String>,
}

/// Health-facing view of one worker, written by the worker and read by the health monitor
#[derive(Debug)]
pub struct ConsumerStatus {
    worker_id: usize,
    inner: RwLock<StatusInner>,
    persisted: AtomicU64,
    skipped: AtomicU64,
    rejected: AtomicU64,
    commits: AtomicU64,
}

/// Point-in-time copy of a worker status
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub worker_id: usize,
    pub state: WorkerState,
    pub paused: bool,
    pub assignment: Vec<i32>,
    /// Time since the last commit or caught-up poll, `None` before the first one
    #[serde(skip)]
    pub since_progress: Option<Duration>,
    #[serde(skip)]
    pub since_start: Option<Duration>,
    pub persisted: u64,
    pub skipped: u64,
    pub rejected: u64,
    pub commits: u64,
    pub last_error: Option<String>,
}

impl ConsumerStatus {
    pub fn new(worker_id: usize) -> Self {
        Self {
            worker_id,
            inner: RwLock::new(StatusInner {
                state: WorkerState::Init,
                started_at: None,
                last_commit_at: None,
                last_idle_poll_at: None,
                paused_since: None,
                assignment: Vec::new(),
                last_error: None,
            }),
            persisted: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            commits: AtomicU64::new(0),
        }
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn state(&self) -> WorkerState {
        self.inner.read().state
    }

    pub fn set_state(&self, state: WorkerState) {
        let mut inner = self.inner.write();
        if state == WorkerState::JoiningGroup && inner.started_at.is_none() {
            inner.started_at = Some(Instant::now());
        }
        if state == WorkerState::PausedOnStoreFailure && inner.paused_since.is_none() {
            inner.paused_since = Some(Instant::now());
        }
        inner.state = state;
    }

    /// Startup failed; the worker never consumed
    pub fn mark_failed(&self, error: impl Into<String>) {
        let mut inner = self.inner.write();
        inner.state = WorkerState::Failed;
        inner.last_error = Some(error.into());
    }

    pub fn set_assignment(&self, assignment: Vec<i32>) {
        self.inner.write().assignment = assignment;
    }

    pub fn record_error(&self, error: impl Into<String>) {
        self.inner.write().last_error = Some(error.into());
    }

    pub fn mark_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
        self.inner.write().last_commit_at = Some(Instant::now());
    }

    /// A poll returned nothing: every owned partition is caught up
    pub fn mark_idle_poll(&self) {
        self.inner.write().last_idle_poll_at = Some(Instant::now());
    }

    pub fn mark_persisted(&self) {
        self.persisted.fetch_add(1, Ordering::Relaxed);
        self.clear_pause();
    }

    pub fn mark_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
        self.clear_pause();
    }

    pub fn mark_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        self.clear_pause();
    }

    fn clear_pause(&self) {
        let mut inner = self.inner.write();
        if inner.paused_since.take().is_some() {
            inner.last_error = None;
        }
    }

    pub fn persisted(&self) -> u64 {
        self.persisted.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    pub fn is_paused(&self) -> bool {
        self.inner.read().paused_since.is_some()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let inner = self.inner.read();
        let last_progress = match (inner.last_commit_at, inner.last_idle_poll_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };

        StatusSnapshot {
            worker_id: self.worker_id,
            state: inner.state,
            paused: inner.paused_since.is_some(),
            assignment: inner.assignment.clone(),
            since_progress: last_progress.map(|t| t.elapsed()),
            since_start: inner.started_at.map(|t| t.elapsed()),
            persisted: self.persisted(),
            skipped: self.skipped(),
            rejected: self.rejected(),
            commits: self.commits(),
            last_error: inner.last_error.clone(),
        }
    }
}
