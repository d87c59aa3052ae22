use crate::simulation::*;
use crate::task::*;
use crate::worker::types::*;
use futures::FutureExt;
use rand::Rng;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Drives batches from a scheduler through the remote simulation service
#[async_trait::async_trait]
pub trait Worker: Send + Sync {
    fn id(&self) -> WorkerId;

    async fn set_scheduler(&self, scheduler: SharedScheduler);

    /// Run the scheduling loop until stopped or a precondition fails
    async fn run(&self) -> Result<(), WorkerError>;

    /// Request shutdown; with `cancel_tasks` in-flight remote jobs are cancelled too
    async fn stop(&self, cancel_tasks: bool);

    async fn add_task_complete_callback(&self, callback: CompletionCallback);

    async fn add_heartbeat_callback(&self, callback: HeartbeatCallback);

    /// Tasks of the batch currently being processed
    async fn get_current_tasks(&self) -> Vec<SimulationTask>;
}

/// How a poll loop ended
enum PollEnd<T> {
    Finished(T),
    Cancelled,
}

/// Everything needed to settle a task, shareable with spawned child resolvers
#[derive(Clone)]
struct CompletionContext {
    worker_id: WorkerId,
    client: Arc<dyn SimulationClient>,
    store: Arc<dyn TaskStore>,
    callbacks: Arc<RwLock<Vec<CompletionCallback>>>,
    config: WorkerConfig,
}

impl CompletionContext {
    /// Persist a terminal status, run the post-update and notify callbacks
    async fn finish(
        &self,
        task: &mut SimulationTask,
        status: TaskStatus,
        result: Option<SimulationResult>,
        message: Option<String>,
    ) {
        if let Some(result) = &result {
            task.alpha_id = result.alpha.clone();
            task.result = serde_json::to_value(result).ok();
        } else if let Some(message) = &message {
            task.result = Some(serde_json::json!({ "error": message }));
        }

        if let Err(e) = task.transition_to(status) {
            warn!(
                phase = "completion",
                worker_id = %self.worker_id,
                task_id = task.id,
                "Skipping status change: {}",
                e
            );
        }

        if let Err(e) = self.store.save_task(task).await {
            error!(
                phase = "completion",
                worker_id = %self.worker_id,
                task_id = task.id,
                "Failed to persist task outcome: {}",
                e
            );
        }

        info!(
            phase = "completion",
            worker_id = %self.worker_id,
            task_id = task.id,
            status = %task.status,
            alpha_id = ?task.alpha_id,
            "Task finished"
        );

        if task.status == TaskStatus::Complete {
            self.post_update(task).await;
        }

        let outcome = TaskOutcome {
            status: task.status,
            result,
            message,
        };
        self.notify(task, &outcome).await;
    }

    /// Best-effort remote metadata update; failures never touch the stored outcome
    async fn post_update(&self, task: &SimulationTask) {
        let Some(alpha_id) = &task.alpha_id else {
            return;
        };
        if task.tags.is_empty() {
            return;
        }

        if let Err(e) = self.client.tag_alpha(alpha_id, &task.tags).await {
            warn!(
                phase = "post_update",
                worker_id = %self.worker_id,
                task_id = task.id,
                alpha_id = %alpha_id,
                "Tagging alpha failed: {}",
                e
            );
        }
    }

    async fn notify(&self, task: &SimulationTask, outcome: &TaskOutcome) {
        let callbacks = self.callbacks.read().await.clone();
        for callback in callbacks {
            if let Err(e) = callback.invoke(task, outcome).await {
                error!(
                    worker_id = %self.worker_id,
                    task_id = task.id,
                    "Completion callback failed: {}",
                    e
                );
            }
        }
    }

    /// Fetch one multi-job child until it finishes and settle its task
    async fn resolve_child(self, mut task: SimulationTask, child_id: String) {
        for attempt in 0..=self.config.max_child_polls {
            match self.client.fetch_child_result(&child_id).await {
                Ok((true, result)) => {
                    let status = result.task_status();
                    self.finish(&mut task, status, Some(result), None).await;
                    return;
                }
                Ok((false, _)) => {
                    debug!(
                        phase = "poll",
                        task_id = task.id,
                        child_progress_id = %child_id,
                        attempt,
                        "Child simulation not finished"
                    );
                    tokio::time::sleep(self.config.child_poll_interval).await;
                }
                Err(e) => {
                    let message = format!("fetching child result failed: {}", e);
                    self.finish(&mut task, TaskStatus::Error, None, Some(message))
                        .await;
                    return;
                }
            }
        }

        let message = format!(
            "child {} did not finish after {} attempts",
            child_id, self.config.max_child_polls
        );
        self.finish(&mut task, TaskStatus::Error, None, Some(message))
            .await;
    }
}

/// Worker bound to one remote client session
pub struct SimulationWorker {
    id: WorkerId,
    context: CompletionContext,
    scheduler: RwLock<Option<SharedScheduler>>,
    heartbeat_callbacks: RwLock<Vec<HeartbeatCallback>>,
    heartbeat_lock: Mutex<()>,
    run_lock: Mutex<()>,
    post_handlers: Mutex<Vec<JoinHandle<()>>>,
    current_tasks: Mutex<Vec<SimulationTask>>,
    shutdown: CancellationToken,
    cancel_jobs: CancellationToken,
}

impl SimulationWorker {
    pub fn new(
        client: Arc<dyn SimulationClient>,
        store: Arc<dyn TaskStore>,
        config: WorkerConfig,
    ) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            context: CompletionContext {
                worker_id: id,
                client,
                store,
                callbacks: Arc::new(RwLock::new(Vec::new())),
                config,
            },
            scheduler: RwLock::new(None),
            heartbeat_callbacks: RwLock::new(Vec::new()),
            heartbeat_lock: Mutex::new(()),
            run_lock: Mutex::new(()),
            post_handlers: Mutex::new(Vec::new()),
            current_tasks: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
            cancel_jobs: CancellationToken::new(),
        }
    }

    /// Tie this worker's shutdown to a parent token
    pub fn with_parent_token(mut self, parent: &CancellationToken) -> Self {
        self.shutdown = parent.child_token();
        self
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn cancel_requested(&self) -> bool {
        self.shutdown.is_cancelled() && self.cancel_jobs.is_cancelled()
    }

    async fn heartbeat(&self) {
        let _in_flight = self.heartbeat_lock.lock().await;
        let callbacks = self.heartbeat_callbacks.read().await.clone();
        for callback in callbacks {
            if let Err(e) = callback.invoke(self.id).await {
                warn!(worker_id = %self.id, "Heartbeat callback failed: {}", e);
            }
        }
    }

    /// Sleep, waking early on shutdown
    async fn idle(&self) {
        tokio::select! {
            _ = tokio::time::sleep(self.context.config.idle_poll_interval) => {}
            _ = self.shutdown.cancelled() => {}
        }
    }

    /// Sleep, waking early on a cancel request when `wake_on_cancel`
    async fn pause(&self, duration: Duration, wake_on_cancel: bool) {
        if wake_on_cancel {
            tokio::select! {
                _ = tokio::time::sleep(duration) => {}
                _ = self.cancel_jobs.cancelled() => {}
            }
        } else {
            tokio::time::sleep(duration).await;
        }
    }

    async fn run_loop(&self) -> Result<(), WorkerError> {
        let scheduler = self
            .scheduler
            .read()
            .await
            .clone()
            .ok_or(WorkerError::SchedulerNotSet)?;

        while !self.shutdown.is_cancelled() {
            self.heartbeat().await;

            let capability = self
                .context
                .client
                .submission_capability()
                .ok_or(WorkerError::UnrecognizedCapability)?;

            let scheduled = scheduler.lock().await.schedule(capability.max_jobs).await;
            match scheduled {
                Ok(batch) if !batch.is_empty() => self.process_batch(batch).await,
                Ok(_) | Err(SchedulerError::NoTasksAvailable) => {
                    debug!(worker_id = %self.id, "No tasks available");
                    self.idle().await;
                }
                Err(e) => {
                    warn!(phase = "schedule", worker_id = %self.id, "Scheduling failed: {}", e);
                    self.idle().await;
                }
            }
        }

        Ok(())
    }

    /// Dispatch one batch; any failure settles its unfinished tasks as ERROR
    async fn process_batch(&self, batch: Vec<SimulationTask>) {
        *self.current_tasks.lock().await = batch.clone();
        let mut tasks = batch;

        let failure = match AssertUnwindSafe(self.dispatch(&mut tasks))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some("panic while dispatching batch".to_string()),
        };

        if let Some(reason) = failure {
            let ids: Vec<TaskId> = tasks.iter().map(|t| t.id).collect();
            error!(
                phase = "dispatch",
                worker_id = %self.id,
                task_ids = ?ids,
                "Batch failed: {}",
                reason
            );
            for task in tasks.iter_mut().filter(|t| !t.is_terminal()) {
                self.context
                    .finish(task, TaskStatus::Error, None, Some(reason.clone()))
                    .await;
            }
        }

        self.current_tasks.lock().await.clear();
    }

    async fn dispatch(&self, tasks: &mut [SimulationTask]) -> Result<(), WorkerError> {
        match tasks {
            [] => Ok(()),
            [task] => self.dispatch_single(task).await,
            _ => self.dispatch_multi(tasks).await,
        }
    }

    async fn dispatch_single(&self, task: &mut SimulationTask) -> Result<(), WorkerError> {
        let client = self.context.client.clone();
        let submitted = client.submit_single(&SimulationRequest::from(&*task)).await?;

        let Some(progress_id) = submitted.handle().map(str::to_string) else {
            warn!(phase = "dispatch", worker_id = %self.id, task_id = task.id, "Submission rejected");
            self.context
                .finish(task, TaskStatus::Error, None, Some("submission rejected".to_string()))
                .await;
            return Ok(());
        };

        task.parent_progress_id = Some(progress_id.clone());
        task.transition_to(TaskStatus::Running)?;
        self.context.store.save_task(task).await?;
        info!(
            phase = "dispatch",
            worker_id = %self.id,
            task_id = task.id,
            progress_id = %progress_id,
            "Submitted single simulation"
        );

        let end = self
            .poll_until_done(&progress_id, submitted.retry_after, || {
                client.poll_single(&progress_id)
            })
            .await?;

        match end {
            PollEnd::Finished(result) => {
                let status = result.task_status();
                self.context.finish(task, status, Some(result), None).await;
            }
            PollEnd::Cancelled => {
                self.context
                    .finish(task, TaskStatus::Cancelled, None, Some("cancelled on shutdown".to_string()))
                    .await;
            }
        }
        Ok(())
    }

    async fn dispatch_multi(&self, tasks: &mut [SimulationTask]) -> Result<(), WorkerError> {
        let client = self.context.client.clone();
        let requests: Vec<SimulationRequest> = tasks.iter().map(SimulationRequest::from).collect();
        let submitted = client.submit_multi(&requests).await?;

        let Some(progress_id) = submitted.handle().map(str::to_string) else {
            warn!(
                phase = "dispatch",
                worker_id = %self.id,
                tasks = tasks.len(),
                "Multi-simulation submission rejected"
            );
            for task in tasks.iter_mut() {
                self.context
                    .finish(task, TaskStatus::Error, None, Some("submission rejected".to_string()))
                    .await;
            }
            return Ok(());
        };

        for task in tasks.iter_mut() {
            task.parent_progress_id = Some(progress_id.clone());
            task.transition_to(TaskStatus::Running)?;
            self.context.store.save_task(task).await?;
        }
        info!(
            phase = "dispatch",
            worker_id = %self.id,
            progress_id = %progress_id,
            tasks = tasks.len(),
            "Submitted multi simulation"
        );

        let end = self
            .poll_until_done(&progress_id, submitted.retry_after, || {
                client.poll_multi(&progress_id)
            })
            .await?;

        match end {
            PollEnd::Finished(multi) => self.resolve_children(tasks, &progress_id, multi).await,
            PollEnd::Cancelled => {
                for task in tasks.iter_mut() {
                    self.context
                        .finish(task, TaskStatus::Cancelled, None, Some("cancelled on shutdown".to_string()))
                        .await;
                }
            }
        }
        Ok(())
    }

    /// Poll a remote job until it finishes or is cancelled on shutdown
    async fn poll_until_done<T, F, Fut>(
        &self,
        progress_id: &str,
        first_wait: Duration,
        poll: F,
    ) -> Result<PollEnd<T>, WorkerError>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<PollOutcome<T>, SimulationError>> + Send,
        T: Send,
    {
        let min_wait = self.context.config.min_poll_interval;
        self.pause(first_wait.max(min_wait), true).await;

        let mut cancel_attempted = false;
        loop {
            self.heartbeat().await;

            if !cancel_attempted && self.cancel_requested() {
                cancel_attempted = true;
                if self.cancel_remote(progress_id).await {
                    return Ok(PollEnd::Cancelled);
                }
            }

            match poll().await? {
                PollOutcome::Finished(result) => return Ok(PollEnd::Finished(result)),
                PollOutcome::Running {
                    progress,
                    retry_after,
                } => {
                    debug!(
                        phase = "poll",
                        worker_id = %self.id,
                        progress_id = %progress_id,
                        progress = ?progress,
                        "Simulation still running"
                    );
                    self.pause(retry_after.max(min_wait), !cancel_attempted).await;
                }
            }
        }
    }

    /// One jittered attempt to delete the remote job
    async fn cancel_remote(&self, progress_id: &str) -> bool {
        let max_jitter = self.context.config.cancel_jitter;
        if !max_jitter.is_zero() {
            let jitter = rand::rng().random_range(Duration::ZERO..max_jitter);
            tokio::time::sleep(jitter).await;
        }

        match self.context.client.cancel(progress_id).await {
            Ok(true) => {
                info!(
                    phase = "cancel",
                    worker_id = %self.id,
                    progress_id = %progress_id,
                    "Cancelled remote simulation"
                );
                true
            }
            Ok(false) => {
                warn!(
                    phase = "cancel",
                    worker_id = %self.id,
                    progress_id = %progress_id,
                    "Remote service refused cancellation, continuing to poll"
                );
                false
            }
            Err(e) => {
                warn!(
                    phase = "cancel",
                    worker_id = %self.id,
                    progress_id = %progress_id,
                    "Cancellation failed, continuing to poll: {}",
                    e
                );
                false
            }
        }
    }

    /// Pair local tasks with returned child handles and resolve each in the background
    async fn resolve_children(
        &self,
        tasks: &mut [SimulationTask],
        progress_id: &str,
        multi: MultiSimulationResult,
    ) {
        if multi.children.len() != tasks.len() {
            let unmatched: Vec<TaskId> = tasks
                .iter()
                .skip(multi.children.len())
                .map(|t| t.id)
                .collect();
            warn!(
                phase = "completion",
                worker_id = %self.id,
                progress_id = %progress_id,
                expected = tasks.len(),
                received = multi.children.len(),
                unmatched = ?unmatched,
                "Child count mismatch, unmatched tasks left for follow-up"
            );
        }

        for (task, child_id) in tasks.iter_mut().zip(multi.children) {
            task.child_progress_id = Some(child_id.clone());
            if let Err(e) = self.context.store.save_task(task).await {
                warn!(
                    phase = "completion",
                    worker_id = %self.id,
                    task_id = task.id,
                    "Failed to record child handle: {}",
                    e
                );
            }

            let context = self.context.clone();
            let handle = tokio::spawn(context.resolve_child(task.clone(), child_id));
            self.track_post_handler(handle).await;
        }
    }

    async fn track_post_handler(&self, handle: JoinHandle<()>) {
        let mut handlers = self.post_handlers.lock().await;
        handlers.retain(|h| !h.is_finished());
        handlers.push(handle);
    }

    /// Wait for child resolvers up to the configured timeout, then abort the rest
    async fn drain_post_handlers(&self) {
        let handlers = std::mem::take(&mut *self.post_handlers.lock().await);
        if handlers.is_empty() {
            return;
        }

        let pending = handlers.len();
        let aborts: Vec<_> = handlers.iter().map(JoinHandle::abort_handle).collect();
        let timeout = self.context.config.post_handler_timeout;

        match tokio::time::timeout(timeout, futures::future::join_all(handlers)).await {
            Ok(_) => debug!(worker_id = %self.id, "Drained {} post handlers", pending),
            Err(_) => {
                warn!(
                    worker_id = %self.id,
                    "Post handlers still running after {:?}, aborting",
                    timeout
                );
                for abort in aborts {
                    abort.abort();
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Worker for SimulationWorker {
    fn id(&self) -> WorkerId {
        self.id
    }

    async fn set_scheduler(&self, scheduler: SharedScheduler) {
        *self.scheduler.write().await = Some(scheduler);
    }

    async fn run(&self) -> Result<(), WorkerError> {
        let _running = self
            .run_lock
            .try_lock()
            .map_err(|_| WorkerError::AlreadyRunning(self.id))?;

        info!(worker_id = %self.id, "Worker started");
        let result = self.run_loop().await;

        self.drain_post_handlers().await;
        if let Err(e) = self.context.client.close().await {
            warn!(worker_id = %self.id, "Closing client failed: {}", e);
        }

        match &result {
            Ok(()) => info!(worker_id = %self.id, "Worker stopped"),
            Err(e) => error!(worker_id = %self.id, "Worker aborted: {}", e),
        }
        result
    }

    async fn stop(&self, cancel_tasks: bool) {
        info!(worker_id = %self.id, cancel_tasks, "Stopping worker");
        if cancel_tasks {
            self.cancel_jobs.cancel();
        }
        self.shutdown.cancel();
        self.drain_post_handlers().await;
    }

    async fn add_task_complete_callback(&self, callback: CompletionCallback) {
        self.context.callbacks.write().await.push(callback);
    }

    async fn add_heartbeat_callback(&self, callback: HeartbeatCallback) {
        self.heartbeat_callbacks.write().await.push(callback);
    }

    async fn get_current_tasks(&self) -> Vec<SimulationTask> {
        self.current_tasks.lock().await.clone()
    }
}
