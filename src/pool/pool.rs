use crate::pool::types::*;
use crate::simulation::ClientFactory;
use crate::task::{SharedScheduler, TaskStore};
use crate::worker::*;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Elastic set of workers sharing one scheduler
#[async_trait::async_trait]
pub trait WorkerPool: Send + Sync {
    async fn start(&self) -> Result<(), PoolError>;

    /// Stop every worker, cancelling in-flight remote jobs
    async fn stop(&self);

    /// Add `count` workers, returning how many were started
    async fn scale_up(&self, count: usize) -> usize;

    /// Remove up to `count` workers, least recently active first, always keeping one
    async fn scale_down(&self, count: usize) -> usize;

    async fn get_status(&self) -> PoolStatus;

    async fn worker_count(&self) -> usize;
}

#[derive(Default)]
struct PoolState {
    workers: Vec<Arc<dyn Worker>>,
    worker_tasks: HashMap<WorkerId, JoinHandle<()>>,
}

struct PoolInner {
    scheduler: SharedScheduler,
    store: Arc<dyn TaskStore>,
    client_factory: ClientFactory,
    worker_config: WorkerConfig,
    config: PoolConfig,
    state: Mutex<PoolState>,
    last_active: Arc<DashMap<WorkerId, Instant>>,
    stats: Arc<Mutex<PoolStats>>,
    running: AtomicBool,
    shutdown: Mutex<CancellationToken>,
    background: Mutex<Vec<JoinHandle<()>>>,
    started: Mutex<Option<(DateTime<Utc>, Instant)>>,
}

/// Worker pool with health-check restarts and elastic scaling
pub struct ElasticWorkerPool {
    inner: Arc<PoolInner>,
}

impl ElasticWorkerPool {
    pub fn new(
        scheduler: SharedScheduler,
        store: Arc<dyn TaskStore>,
        client_factory: ClientFactory,
        worker_config: WorkerConfig,
        config: PoolConfig,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                scheduler,
                store,
                client_factory,
                worker_config,
                config,
                state: Mutex::new(PoolState::default()),
                last_active: Arc::new(DashMap::new()),
                stats: Arc::new(Mutex::new(PoolStats::default())),
                running: AtomicBool::new(false),
                shutdown: Mutex::new(CancellationToken::new()),
                background: Mutex::new(Vec::new()),
                started: Mutex::new(None),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Ids of the current workers in creation order
    pub async fn worker_ids(&self) -> Vec<WorkerId> {
        let state = self.inner.state.lock().await;
        state.workers.iter().map(|w| w.id()).collect()
    }

    /// Run one health check pass immediately
    pub async fn check_health(&self) -> usize {
        self.inner.check_workers().await
    }
}

impl PoolInner {
    /// Create, register and launch one worker; the caller holds the state lock
    async fn spawn_worker(&self, state: &mut PoolState) -> WorkerId {
        let token = self.shutdown.lock().await.clone();
        let client = (self.client_factory)();
        let worker = SimulationWorker::new(client, self.store.clone(), self.worker_config.clone())
            .with_parent_token(&token);
        let worker_id = worker.id();

        worker.set_scheduler(self.scheduler.clone()).await;

        let last_active = self.last_active.clone();
        worker
            .add_heartbeat_callback(HeartbeatCallback::sync(move |id| {
                match last_active.get_mut(&id) {
                    Some(mut seen) => *seen = Instant::now(),
                    None => warn!(worker_id = %id, "Heartbeat from unknown worker"),
                }
                Ok(())
            }))
            .await;

        let stats = self.stats.clone();
        worker
            .add_task_complete_callback(CompletionCallback::from_async(move |task, _outcome| {
                let stats = stats.clone();
                Box::pin(async move {
                    stats.lock().await.record(&task);
                    Ok(())
                })
            }))
            .await;

        let worker: Arc<dyn Worker> = Arc::new(worker);
        self.last_active.insert(worker_id, Instant::now());

        let runner = worker.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = runner.run().await {
                error!(
                    worker_id = %runner.id(),
                    fatal = e.is_fatal(),
                    "Worker loop exited: {}",
                    e
                );
            }
        });

        state.workers.push(worker);
        state.worker_tasks.insert(worker_id, handle);
        debug!(worker_id = %worker_id, "Worker started");
        worker_id
    }

    /// Stop one worker and wait a bounded time for its loop; the caller holds the state lock
    async fn retire_worker(&self, state: &mut PoolState, worker_id: WorkerId) -> bool {
        let Some(index) = state.workers.iter().position(|w| w.id() == worker_id) else {
            return false;
        };
        let worker = state.workers.remove(index);
        let handle = state.worker_tasks.remove(&worker_id);

        worker.stop(true).await;
        if let Some(handle) = handle {
            let abort = handle.abort_handle();
            if tokio::time::timeout(self.config.restart_timeout, handle)
                .await
                .is_err()
            {
                warn!(
                    worker_id = %worker_id,
                    "Worker loop did not exit within {:?}, aborting",
                    self.config.restart_timeout
                );
                abort.abort();
            }
        }

        self.last_active.remove(&worker_id);
        true
    }

    async fn restart_worker(&self, worker_id: WorkerId) -> Option<WorkerId> {
        let mut state = self.state.lock().await;
        if !self.retire_worker(&mut state, worker_id).await {
            return None;
        }
        Some(self.spawn_worker(&mut state).await)
    }

    /// Workers silent for longer than the timeout whose loop is still alive
    async fn stale_workers(&self) -> Vec<(WorkerId, Duration)> {
        let state = self.state.lock().await;
        let now = Instant::now();
        state
            .workers
            .iter()
            .map(|w| w.id())
            .filter(|id| {
                state
                    .worker_tasks
                    .get(id)
                    .is_some_and(|handle| !handle.is_finished())
            })
            .filter_map(|id| {
                let last = *self.last_active.get(&id)?;
                let silent = now.duration_since(last);
                (silent > self.config.worker_timeout).then_some((id, silent))
            })
            .collect()
    }

    async fn check_workers(&self) -> usize {
        let mut restarted = 0;
        for (worker_id, silent) in self.stale_workers().await {
            warn!(
                phase = "health_check",
                worker_id = %worker_id,
                silent_for = ?silent,
                "Worker missed its heartbeat window, restarting"
            );
            match self.restart_worker(worker_id).await {
                Some(replacement) => {
                    restarted += 1;
                    info!(
                        phase = "health_check",
                        worker_id = %worker_id,
                        replacement = %replacement,
                        "Worker replaced"
                    );
                }
                None => debug!(
                    phase = "health_check",
                    worker_id = %worker_id,
                    "Worker already removed"
                ),
            }
        }
        restarted
    }

    async fn health_check_loop(self: Arc<Self>, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.effective_health_check_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    self.check_workers().await;
                }
            }
        }
        debug!(phase = "health_check", "Health check loop stopped");
    }

    async fn status_log_loop(self: Arc<Self>, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.status_log_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let status = self.status().await;
                    info!(
                        workers = status.worker_count,
                        processed = status.processed,
                        failed = status.failed,
                        tasks_per_minute = ?status.tasks_per_minute,
                        avg_task_duration = ?status.avg_task_duration,
                        "Pool status"
                    );
                }
            }
        }
    }

    async fn status(&self) -> PoolStatus {
        let worker_count = self.state.lock().await.workers.len();
        let started = *self.started.lock().await;
        let stats = self.stats.lock().await;

        let uptime = started.map_or(Duration::ZERO, |(_, since)| since.elapsed());
        let tasks_per_minute = (uptime >= Duration::from_secs(60))
            .then(|| stats.processed as f64 / (uptime.as_secs_f64() / 60.0));
        let health_check_enabled = self.config.health_check_enabled();

        PoolStatus {
            running: self.running.load(Ordering::SeqCst),
            worker_count,
            started_at: started.map(|(at, _)| at),
            uptime,
            processed: stats.processed,
            failed: stats.failed,
            success_rate: stats.success_rate(),
            avg_task_duration: stats.average_duration(),
            tasks_per_minute,
            health_check_enabled,
            health_check_interval: health_check_enabled
                .then(|| self.config.effective_health_check_interval()),
        }
    }

    async fn add_workers(&self, count: usize) -> usize {
        for i in 0..count {
            if i > 0 && !self.config.worker_start_delay.is_zero() {
                tokio::time::sleep(self.config.worker_start_delay).await;
            }
            let mut state = self.state.lock().await;
            self.spawn_worker(&mut state).await;
        }
        count
    }
}

#[async_trait::async_trait]
impl WorkerPool for ElasticWorkerPool {
    async fn start(&self) -> Result<(), PoolError> {
        let inner = &self.inner;
        inner.config.validate()?;
        if inner.running.swap(true, Ordering::SeqCst) {
            warn!("Worker pool already running");
            return Ok(());
        }

        let token = CancellationToken::new();
        *inner.shutdown.lock().await = token.clone();
        *inner.started.lock().await = Some((Utc::now(), Instant::now()));
        inner.stats.lock().await.reset();

        inner.add_workers(inner.config.initial_workers).await;

        let mut background = inner.background.lock().await;
        if inner.config.health_check_enabled() {
            background.push(tokio::spawn(
                inner.clone().health_check_loop(token.child_token()),
            ));
        }
        if !inner.config.status_log_interval.is_zero() {
            background.push(tokio::spawn(
                inner.clone().status_log_loop(token.child_token()),
            ));
        }

        info!(
            workers = inner.config.initial_workers,
            health_check_enabled = inner.config.health_check_enabled(),
            "Worker pool started"
        );
        Ok(())
    }

    async fn stop(&self) {
        let inner = &self.inner;
        if !inner.running.swap(false, Ordering::SeqCst) {
            debug!("Worker pool not running");
            return;
        }
        info!("Stopping worker pool");

        inner.shutdown.lock().await.cancel();
        for handle in inner.background.lock().await.drain(..) {
            handle.abort();
        }

        let mut state = inner.state.lock().await;
        let workers = std::mem::take(&mut state.workers);
        futures::future::join_all(workers.iter().map(|w| w.stop(true))).await;

        let handles: Vec<JoinHandle<()>> = state.worker_tasks.drain().map(|(_, h)| h).collect();
        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        if tokio::time::timeout(inner.config.stop_timeout, futures::future::join_all(handles))
            .await
            .is_err()
        {
            warn!(
                "Worker loops still running after {:?}, aborting",
                inner.config.stop_timeout
            );
            for abort in aborts {
                abort.abort();
            }
        }

        inner.last_active.clear();
        info!(workers = workers.len(), "Worker pool stopped");
    }

    async fn scale_up(&self, count: usize) -> usize {
        if !self.is_running() {
            warn!(phase = "scale", "Cannot scale up a stopped pool");
            return 0;
        }
        let added = self.inner.add_workers(count).await;
        info!(phase = "scale", added, "Scaled up");
        added
    }

    async fn scale_down(&self, count: usize) -> usize {
        if !self.is_running() {
            warn!(phase = "scale", "Cannot scale down a stopped pool");
            return 0;
        }

        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        let removable = count.min(state.workers.len().saturating_sub(1));
        if removable == 0 {
            return 0;
        }

        let mut candidates: Vec<(WorkerId, Instant)> = state
            .workers
            .iter()
            .map(|w| {
                let id = w.id();
                let seen = inner.last_active.get(&id).map(|e| *e);
                (id, seen.unwrap_or_else(Instant::now))
            })
            .collect();
        candidates.sort_by_key(|(_, seen)| *seen);

        let mut removed = 0;
        for (worker_id, _) in candidates.into_iter().take(removable) {
            if inner.retire_worker(&mut state, worker_id).await {
                removed += 1;
            }
        }

        info!(
            phase = "scale",
            removed,
            remaining = state.workers.len(),
            "Scaled down"
        );
        removed
    }

    async fn get_status(&self) -> PoolStatus {
        self.inner.status().await
    }

    async fn worker_count(&self) -> usize {
        self.inner.state.lock().await.workers.len()
    }
}
