use crate::simulation::{SimulationError, SimulationResult};
use crate::task::{SimulationTask, StatusTransitionError, StoreError, TaskStatus};
use anyhow::anyhow;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for workers
pub type WorkerId = Uuid;

/// Errors that end a worker's run loop or a single batch
#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkerError {
    #[error("scheduler not set")]
    SchedulerNotSet,
    #[error("worker {0} is already running")]
    AlreadyRunning(WorkerId),
    #[error("operator role is not recognized, cannot size batches")]
    UnrecognizedCapability,
    #[error("remote call failed: {0}")]
    Remote(#[from] SimulationError),
    #[error("persisting task failed: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transition(#[from] StatusTransitionError),
}

impl WorkerError {
    /// Precondition failures abort the worker; everything else only fails a batch
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            WorkerError::SchedulerNotSet
                | WorkerError::AlreadyRunning(_)
                | WorkerError::UnrecognizedCapability
        )
    }
}

/// Worker timing configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Sleep between scheduling attempts when no work is available
    pub idle_poll_interval: Duration,
    /// Floor applied to server retry hints
    pub min_poll_interval: Duration,
    /// Upper bound of the random delay before a remote cancel
    pub cancel_jitter: Duration,
    /// Wait between attempts to fetch an unfinished multi-job child
    pub child_poll_interval: Duration,
    /// Attempts before an unfinished child is given up as failed
    pub max_child_polls: u32,
    /// How long shutdown waits for child resolution before aborting it
    pub post_handler_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            idle_poll_interval: Duration::from_secs(5),
            min_poll_interval: Duration::from_millis(200),
            cancel_jitter: Duration::from_secs(2),
            child_poll_interval: Duration::from_secs(2),
            max_child_polls: 30,
            post_handler_timeout: Duration::from_secs(30),
        }
    }
}

/// What happened to a task when it reached a terminal status
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub status: TaskStatus,
    pub result: Option<SimulationResult>,
    pub message: Option<String>,
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Complete
    }
}

pub type CallbackFuture = BoxFuture<'static, anyhow::Result<()>>;

type SyncCompletionFn = dyn Fn(&SimulationTask, &TaskOutcome) -> anyhow::Result<()> + Send + Sync;
type AsyncCompletionFn = dyn Fn(SimulationTask, TaskOutcome) -> CallbackFuture + Send + Sync;

/// Invoked once per task that reaches a terminal status
#[derive(Clone)]
pub enum CompletionCallback {
    Sync(Arc<SyncCompletionFn>),
    Async(Arc<AsyncCompletionFn>),
}

impl CompletionCallback {
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&SimulationTask, &TaskOutcome) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        CompletionCallback::Sync(Arc::new(f))
    }

    pub fn from_async<F>(f: F) -> Self
    where
        F: Fn(SimulationTask, TaskOutcome) -> CallbackFuture + Send + Sync + 'static,
    {
        CompletionCallback::Async(Arc::new(f))
    }

    /// Run the callback, turning a panic into an error
    pub async fn invoke(&self, task: &SimulationTask, outcome: &TaskOutcome) -> anyhow::Result<()> {
        match self {
            CompletionCallback::Sync(f) => {
                std::panic::catch_unwind(AssertUnwindSafe(|| f(task, outcome)))
                    .unwrap_or_else(|_| Err(anyhow!("completion callback panicked")))
            }
            CompletionCallback::Async(f) => {
                let f = f.clone();
                let (task, outcome) = (task.clone(), outcome.clone());
                AssertUnwindSafe(async move { f(task, outcome).await })
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(anyhow!("completion callback panicked")))
            }
        }
    }
}

type SyncHeartbeatFn = dyn Fn(WorkerId) -> anyhow::Result<()> + Send + Sync;
type AsyncHeartbeatFn = dyn Fn(WorkerId) -> CallbackFuture + Send + Sync;

/// Invoked on every heartbeat with the emitting worker's id
#[derive(Clone)]
pub enum HeartbeatCallback {
    Sync(Arc<SyncHeartbeatFn>),
    Async(Arc<AsyncHeartbeatFn>),
}

impl HeartbeatCallback {
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(WorkerId) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        HeartbeatCallback::Sync(Arc::new(f))
    }

    pub fn from_async<F>(f: F) -> Self
    where
        F: Fn(WorkerId) -> CallbackFuture + Send + Sync + 'static,
    {
        HeartbeatCallback::Async(Arc::new(f))
    }

    pub async fn invoke(&self, worker_id: WorkerId) -> anyhow::Result<()> {
        match self {
            HeartbeatCallback::Sync(f) => std::panic::catch_unwind(AssertUnwindSafe(|| f(worker_id)))
                .unwrap_or_else(|_| Err(anyhow!("heartbeat callback panicked"))),
            HeartbeatCallback::Async(f) => {
                let f = f.clone();
                AssertUnwindSafe(async move { f(worker_id).await })
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(anyhow!("heartbeat callback panicked")))
            }
        }
    }
}
