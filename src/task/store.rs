use crate::task::types::*;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

/// Errors raised by task persistence
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("task {0} not found")]
    NotFound(TaskId),
    #[error("a task with signature {0} already exists")]
    DuplicateSignature(String),
    #[error(transparent)]
    InvalidTransition(#[from] StatusTransitionError),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Query shape for reading tasks back out of the store
#[derive(Clone, Debug, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub priority: Option<i32>,
    pub include_ids: Option<Vec<TaskId>>,
    pub exclude_ids: Vec<TaskId>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl TaskFilter {
    pub fn pending() -> Self {
        Self {
            status: Some(TaskStatus::Pending),
            ..Default::default()
        }
    }

    pub fn with_priority(mut self, priority: Option<i32>) -> Self {
        self.priority = priority;
        self
    }

    pub fn excluding(mut self, ids: Vec<TaskId>) -> Self {
        self.exclude_ids = ids;
        self
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    fn matches(&self, task: &SimulationTask) -> bool {
        task.deleted_at.is_none()
            && self.status.is_none_or(|status| task.status == status)
            && self.priority.is_none_or(|priority| task.priority == priority)
            && self
                .include_ids
                .as_ref()
                .is_none_or(|ids| ids.contains(&task.id))
            && !self.exclude_ids.contains(&task.id)
    }
}

/// Durable home of task records
#[async_trait::async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a new task and return it with its assigned id
    async fn create_task(&self, task: SimulationTask) -> Result<SimulationTask, StoreError>;

    /// Persist several tasks at once; nothing is written if any of them is rejected
    async fn create_tasks(
        &self,
        tasks: Vec<SimulationTask>,
    ) -> Result<Vec<SimulationTask>, StoreError>;

    async fn get_task(&self, id: TaskId) -> Result<SimulationTask, StoreError>;

    /// Tasks matching `filter`, ordered by id
    async fn find_tasks(&self, filter: &TaskFilter) -> Result<Vec<SimulationTask>, StoreError>;

    async fn update_status(
        &self,
        id: TaskId,
        status: TaskStatus,
    ) -> Result<SimulationTask, StoreError>;

    async fn update_scheduled_info(
        &self,
        id: TaskId,
        scheduled_at: DateTime<Utc>,
        status: TaskStatus,
    ) -> Result<SimulationTask, StoreError>;

    /// Overwrite the stored record with the worker-owned lifecycle fields of `task`
    async fn save_task(&self, task: &SimulationTask) -> Result<(), StoreError>;
}

/// Process-local task store backed by concurrent maps
pub struct InMemoryTaskStore {
    tasks: DashMap<TaskId, SimulationTask>,
    signatures: DashMap<String, TaskId>,
    next_id: AtomicI64,
    // Serializes inserts so batch creation is all-or-nothing
    write_lock: Mutex<()>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self {
            tasks: DashMap::new(),
            signatures: DashMap::new(),
            next_id: AtomicI64::new(1),
            write_lock: Mutex::new(()),
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Number of stored tasks currently in `status`
    pub fn count_by_status(&self, status: TaskStatus) -> usize {
        self.tasks
            .iter()
            .filter(|entry| entry.status == status && entry.deleted_at.is_none())
            .count()
    }

    fn insert(&self, mut task: SimulationTask) -> SimulationTask {
        task.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.signatures.insert(task.signature.clone(), task.id);
        self.tasks.insert(task.id, task.clone());
        debug!("Stored task {} in group {}", task.id, task.settings_group_key);
        task
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create_task(&self, task: SimulationTask) -> Result<SimulationTask, StoreError> {
        let _guard = self.write_lock.lock().await;
        if self.signatures.contains_key(&task.signature) {
            return Err(StoreError::DuplicateSignature(task.signature));
        }
        Ok(self.insert(task))
    }

    async fn create_tasks(
        &self,
        tasks: Vec<SimulationTask>,
    ) -> Result<Vec<SimulationTask>, StoreError> {
        let _guard = self.write_lock.lock().await;

        let mut seen = HashSet::new();
        for task in &tasks {
            if self.signatures.contains_key(&task.signature) || !seen.insert(&task.signature) {
                return Err(StoreError::DuplicateSignature(task.signature.clone()));
            }
        }

        Ok(tasks.into_iter().map(|task| self.insert(task)).collect())
    }

    async fn get_task(&self, id: TaskId) -> Result<SimulationTask, StoreError> {
        self.tasks
            .get(&id)
            .map(|entry| entry.clone())
            .ok_or(StoreError::NotFound(id))
    }

    async fn find_tasks(&self, filter: &TaskFilter) -> Result<Vec<SimulationTask>, StoreError> {
        let mut matched: Vec<SimulationTask> = self
            .tasks
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        matched.sort_by_key(|task| task.id);

        let limit = filter.limit.unwrap_or(usize::MAX);
        Ok(matched.into_iter().skip(filter.offset).take(limit).collect())
    }

    async fn update_status(
        &self,
        id: TaskId,
        status: TaskStatus,
    ) -> Result<SimulationTask, StoreError> {
        let mut entry = self.tasks.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        entry.transition_to(status)?;
        Ok(entry.clone())
    }

    async fn update_scheduled_info(
        &self,
        id: TaskId,
        scheduled_at: DateTime<Utc>,
        status: TaskStatus,
    ) -> Result<SimulationTask, StoreError> {
        let mut entry = self.tasks.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if entry.status != status {
            entry.transition_to(status)?;
        }
        entry.scheduled_at = Some(scheduled_at);
        Ok(entry.clone())
    }

    async fn save_task(&self, task: &SimulationTask) -> Result<(), StoreError> {
        let mut entry = self
            .tasks
            .get_mut(&task.id)
            .ok_or(StoreError::NotFound(task.id))?;

        if entry.status != task.status && !entry.status.can_transition_to(task.status) {
            return Err(StatusTransitionError {
                task_id: task.id,
                from: entry.status,
                to: task.status,
            }
            .into());
        }

        entry.status = task.status;
        entry.parent_progress_id = task.parent_progress_id.clone();
        entry.child_progress_id = task.child_progress_id.clone();
        entry.alpha_id = task.alpha_id.clone();
        entry.result = task.result.clone();
        entry.scheduled_at = task.scheduled_at.or(entry.scheduled_at);
        entry.completed_at = task.completed_at;
        entry.updated_at = task.updated_at;
        Ok(())
    }
}
