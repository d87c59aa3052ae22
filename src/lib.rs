//! # simdispatch
//!
//! Priority scheduling and dispatch of simulation jobs to a remote
//! compute service.
//!
//! ## Architecture Overview
//!
//! - **[`task`]**: Task model, persistence contract, provider and the priority scheduler
//! - **[`simulation`]**: Contract with the remote simulation service plus a dry-run client
//! - **[`worker`]**: Workers that submit batches, poll them and settle every task
//! - **[`pool`]**: Elastic worker pool with health checks and throughput statistics
//! - **[`integration`]**: Store, scheduler and pool wired behind one handle
//!
//! ## Features
//!
//! ### Scheduling
//! - **Homogeneous batches**: a multi-job batch only ever holds tasks sharing a settings group key
//! - **Priority order**: higher priorities first, insertion order among equals
//! - **Anti-starvation**: groups passed over too often have their priority raised
//!
//! ### Dispatch
//! - **Capability-sized batches**: one job for basic sessions, up to ten for elevated ones
//! - **Cooperative shutdown**: in-flight remote jobs are cancelled on request
//! - **Isolation**: a failing batch is marked ERROR and the worker moves on
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use simdispatch::pool::{ElasticWorkerPool, PoolConfig, WorkerPool};
//! use simdispatch::simulation::{DryRunClient, DryRunConfig};
//! use simdispatch::task::{InMemoryTaskStore, PriorityScheduler, SchedulerConfig, StoreTaskProvider};
//! use simdispatch::worker::WorkerConfig;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(InMemoryTaskStore::new());
//!     let scheduler = PriorityScheduler::new(SchedulerConfig::default())
//!         .with_provider(Arc::new(StoreTaskProvider::new(store.clone())))
//!         .into_shared();
//!
//!     let pool = ElasticWorkerPool::new(
//!         scheduler,
//!         store,
//!         DryRunClient::factory(DryRunConfig::default()),
//!         WorkerConfig::default(),
//!         PoolConfig::default(),
//!     );
//!     pool.start().await?;
//!     pool.scale_up(2).await;
//!     println!("{} workers", pool.worker_count().await);
//!     pool.stop().await;
//!     Ok(())
//! }
//! ```

/// Task model, store contract, provider and scheduler.
///
/// Tasks are validated on creation, grouped by settings group key and served
/// to workers in priority order.
pub mod task;

/// Remote simulation service contract.
pub mod simulation;

/// Batch-driving workers.
///
/// A worker sizes its batches from the session capability, submits them as
/// single or multi jobs and persists every status change.
pub mod worker;

/// Elastic worker pool.
pub mod pool;

/// Store, scheduler and pool wired together.
pub mod integration;

/// Environment constants and path utilities.
///
/// Centralizes the directory and file names used by configuration discovery.
pub mod env;

// CLI module for command-line interface
pub mod cli;

pub use task::{
    InMemoryTaskStore, PriorityScheduler, Scheduler, SchedulerConfig, SchedulerError,
    SharedScheduler, SimulationSettings, SimulationTask, StoreTaskProvider, TaskProvider,
    TaskStatus, TaskStore,
};

pub use simulation::{ClientFactory, DryRunClient, SimulationClient, SubmissionCapability};

pub use worker::{SimulationWorker, Worker, WorkerConfig, WorkerError};

pub use pool::{ElasticWorkerPool, PoolConfig, PoolStatus, WorkerPool};

pub use integration::DispatchSystem;
