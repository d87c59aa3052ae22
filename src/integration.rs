//! # System wiring
//!
//! [`DispatchSystem`] puts a task store, a priority scheduler reading from it
//! and an elastic worker pool behind one handle, so the binary and the
//! integration tests start and drain a dispatcher the same way.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                DispatchSystem                │
//! │  ┌──────────┐  ┌───────────┐  ┌────────────┐ │
//! │  │ TaskStore│─▶│ Scheduler │─▶│ WorkerPool │ │
//! │  └──────────┘  └───────────┘  └────────────┘ │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use simdispatch::cli::DispatcherConfig;
//! use simdispatch::simulation::DryRunClient;
//! use simdispatch::task::InMemoryTaskStore;
//! use simdispatch::DispatchSystem;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = DispatcherConfig::default();
//!     let factory = DryRunClient::factory(config.dry_run.clone());
//!     let system = DispatchSystem::new(config, Arc::new(InMemoryTaskStore::new()), factory);
//!
//!     system.start().await?;
//!     let status = system
//!         .run_until_drained(Duration::from_secs(1), tokio::signal::ctrl_c())
//!         .await?;
//!     println!("processed {} tasks", status.processed);
//!     Ok(())
//! }
//! ```

use crate::cli::DispatcherConfig;
use crate::pool::{ElasticWorkerPool, PoolStatus, WorkerPool};
use crate::simulation::ClientFactory;
use crate::task::{
    PriorityScheduler, SharedScheduler, SimulationTask, StoreTaskProvider, TaskFilter, TaskStatus,
    TaskStore,
};
use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Statuses a task passes through before it settles
const OUTSTANDING: [TaskStatus; 3] = [
    TaskStatus::Pending,
    TaskStatus::Scheduled,
    TaskStatus::Running,
];

const ALL_STATUSES: [TaskStatus; 6] = [
    TaskStatus::Pending,
    TaskStatus::Scheduled,
    TaskStatus::Running,
    TaskStatus::Complete,
    TaskStatus::Error,
    TaskStatus::Cancelled,
];

/// Store, scheduler and worker pool wired together
pub struct DispatchSystem {
    store: Arc<dyn TaskStore>,
    scheduler: SharedScheduler,
    pool: ElasticWorkerPool,
}

impl DispatchSystem {
    pub fn new(
        config: DispatcherConfig,
        store: Arc<dyn TaskStore>,
        client_factory: ClientFactory,
    ) -> Self {
        let provider = Arc::new(StoreTaskProvider::new(store.clone()));
        let scheduler = PriorityScheduler::new(config.scheduler)
            .with_provider(provider)
            .into_shared();
        let pool = ElasticWorkerPool::new(
            scheduler.clone(),
            store.clone(),
            client_factory,
            config.worker,
            config.pool,
        );

        Self {
            store,
            scheduler,
            pool,
        }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &SharedScheduler {
        &self.scheduler
    }

    pub fn pool(&self) -> &ElasticWorkerPool {
        &self.pool
    }

    /// Persist new tasks so the scheduler picks them up on its next refill
    pub async fn submit_tasks(&self, tasks: Vec<SimulationTask>) -> Result<Vec<SimulationTask>> {
        let count = tasks.len();
        let created = self
            .store
            .create_tasks(tasks)
            .await
            .context("storing submitted tasks")?;
        info!(count, "Submitted tasks");
        Ok(created)
    }

    pub async fn start(&self) -> Result<()> {
        self.pool.start().await.context("starting worker pool")
    }

    /// Tasks not yet in a terminal status
    pub async fn outstanding(&self) -> Result<usize> {
        let mut total = 0;
        for status in OUTSTANDING {
            total += self.count(status).await?;
        }
        Ok(total)
    }

    /// Task count per status, in lifecycle order
    pub async fn task_counts(&self) -> Result<Vec<(TaskStatus, usize)>> {
        let mut counts = Vec::with_capacity(ALL_STATUSES.len());
        for status in ALL_STATUSES {
            counts.push((status, self.count(status).await?));
        }
        Ok(counts)
    }

    async fn count(&self, status: TaskStatus) -> Result<usize> {
        let filter = TaskFilter {
            status: Some(status),
            ..TaskFilter::default()
        };
        Ok(self.store.find_tasks(&filter).await?.len())
    }

    /// Wait until every task has settled or `interrupt` resolves, then stop the pool
    pub async fn run_until_drained<F>(&self, check_interval: Duration, interrupt: F) -> Result<PoolStatus>
    where
        F: Future,
    {
        tokio::pin!(interrupt);

        loop {
            let outstanding = self.outstanding().await?;
            if outstanding == 0 {
                info!("All tasks settled");
                break;
            }
            debug!(outstanding, "Waiting for tasks to settle");

            tokio::select! {
                _ = &mut interrupt => {
                    warn!(outstanding, "Interrupted, stopping with tasks outstanding");
                    break;
                }
                _ = tokio::time::sleep(check_interval) => {}
            }
        }

        self.shutdown().await;
        Ok(self.pool.get_status().await)
    }

    pub async fn shutdown(&self) {
        self.pool.stop().await;
    }
}
