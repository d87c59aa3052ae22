use crate::task::store::*;
use crate::task::types::*;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Source of pending tasks for a scheduler refill
#[async_trait::async_trait]
pub trait TaskProvider: Send + Sync {
    /// Up to `count` PENDING tasks, optionally restricted to one priority
    async fn fetch_tasks(
        &self,
        count: usize,
        priority: Option<i32>,
    ) -> Result<Vec<SimulationTask>, StoreError>;

    /// Record that the scheduler has handed these tasks to a worker
    async fn acknowledge_scheduled_tasks(&self, task_ids: &[TaskId]) -> Result<(), StoreError>;
}

/// Provider that pages through a [`TaskStore`] with a wrapping cursor
pub struct StoreTaskProvider {
    store: Arc<dyn TaskStore>,
    sample_interval: usize,
    cursor: Mutex<usize>,
    committing: Mutex<HashSet<TaskId>>,
}

impl StoreTaskProvider {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self {
            store,
            sample_interval: 1,
            cursor: Mutex::new(0),
            committing: Mutex::new(HashSet::new()),
        }
    }

    /// Keep only every `interval`-th pending row when reading
    pub fn with_sample_interval(mut self, interval: usize) -> Self {
        self.sample_interval = interval.max(1);
        self
    }

    async fn read_page(
        &self,
        offset: usize,
        count: usize,
        priority: Option<i32>,
    ) -> Result<Vec<SimulationTask>, StoreError> {
        let excluded: Vec<TaskId> = self.committing.lock().await.iter().copied().collect();
        let filter = TaskFilter::pending()
            .with_priority(priority)
            .excluding(excluded)
            .page(offset, count * self.sample_interval);
        self.store.find_tasks(&filter).await
    }
}

#[async_trait::async_trait]
impl TaskProvider for StoreTaskProvider {
    async fn fetch_tasks(
        &self,
        count: usize,
        priority: Option<i32>,
    ) -> Result<Vec<SimulationTask>, StoreError> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut cursor = self.cursor.lock().await;
        let mut rows = self.read_page(*cursor, count, priority).await?;

        if rows.is_empty() && *cursor > 0 {
            debug!("Task cursor exhausted at offset {}, wrapping to start", *cursor);
            *cursor = 0;
            rows = self.read_page(0, count, priority).await?;
        }

        let read = rows.len();
        let tasks: Vec<SimulationTask> = rows
            .into_iter()
            .step_by(self.sample_interval)
            .take(count)
            .collect();

        // Taken rows leave PENDING once acknowledged; only skipped rows stay ahead of the cursor
        *cursor += read - tasks.len();

        info!(
            "Fetched {} pending tasks (requested {}, priority {:?})",
            tasks.len(),
            count,
            priority
        );
        Ok(tasks)
    }

    async fn acknowledge_scheduled_tasks(&self, task_ids: &[TaskId]) -> Result<(), StoreError> {
        if task_ids.is_empty() {
            return Ok(());
        }

        self.committing.lock().await.extend(task_ids.iter().copied());

        let scheduled_at = Utc::now();
        let mut outcome = Ok(());
        for &id in task_ids {
            if let Err(e) = self
                .store
                .update_scheduled_info(id, scheduled_at, TaskStatus::Scheduled)
                .await
            {
                warn!("Failed to record scheduling of task {}: {}", id, e);
                outcome = Err(e);
            }
        }

        let mut committing = self.committing.lock().await;
        for id in task_ids {
            committing.remove(id);
        }

        debug!("Acknowledged {} scheduled tasks", task_ids.len());
        outcome
    }
}
