use crate::task::provider::TaskProvider;
use crate::task::store::StoreError;
use crate::task::types::*;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Errors surfaced by [`Scheduler::schedule`]
#[derive(Debug, Clone, thiserror::Error)]
pub enum SchedulerError {
    /// Nothing queued and the refill came back empty; retry later
    #[error("no tasks available")]
    NoTasksAvailable,
    #[error("batch size must be at least 1")]
    InvalidBatchSize,
    #[error("task {task_id} is {status}, only PENDING tasks can be scheduled")]
    InvalidStatus { task_id: TaskId, status: TaskStatus },
    #[error("task provider failed: {0}")]
    Provider(#[from] StoreError),
}

impl SchedulerError {
    /// Whether the caller should simply try again on a later cycle
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SchedulerError::NoTasksAvailable | SchedulerError::Provider(_)
        )
    }
}

/// Scheduler configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Tasks pulled from the provider per refill
    pub fetch_size: usize,
    /// Batches served to a group before its remaining tasks are promoted
    pub low_priority_threshold: u32,
    /// Only refill with tasks of this priority
    pub fetch_priority: Option<i32>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            fetch_size: 10,
            low_priority_threshold: 10,
            fetch_priority: None,
        }
    }
}

/// Serves priority-ordered, settings-homogeneous task batches
#[async_trait::async_trait]
pub trait Scheduler: Send {
    fn set_task_provider(&mut self, provider: Arc<dyn TaskProvider>);

    /// Queue tasks; empty input is a no-op
    fn add_tasks(&mut self, tasks: Vec<SimulationTask>);

    /// Pull one refill from the provider, returning how many tasks were added
    async fn fetch_tasks_from_provider(&mut self) -> Result<usize, SchedulerError>;

    /// Whether anything is queued, after one refill attempt when empty
    async fn has_tasks(&mut self) -> bool;

    /// Remove and return the next batch of at most `batch_size` tasks
    async fn schedule(&mut self, batch_size: usize) -> Result<Vec<SimulationTask>, SchedulerError>;
}

/// Scheduler handle shared by the workers of one pool
pub type SharedScheduler = Arc<Mutex<dyn Scheduler>>;

/// Ordering key: higher priority first, then insertion order
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    priority: Reverse<i32>,
    seq: u64,
}

/// In-memory scheduler with per-group indexes and anti-starvation promotion
pub struct PriorityScheduler {
    config: SchedulerConfig,
    provider: Option<Arc<dyn TaskProvider>>,
    tasks: HashMap<u64, SimulationTask>,
    ordering: BTreeSet<QueueKey>,
    groups: HashMap<String, BTreeSet<QueueKey>>,
    skip_counters: HashMap<String, u32>,
    next_seq: u64,
}

impl PriorityScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            provider: None,
            tasks: HashMap::new(),
            ordering: BTreeSet::new(),
            groups: HashMap::new(),
            skip_counters: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn TaskProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Wrap into the lock-guarded handle workers share
    pub fn into_shared(self) -> SharedScheduler {
        Arc::new(Mutex::new(self))
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn group_len(&self, group_key: &str) -> usize {
        self.groups.get(group_key).map_or(0, BTreeSet::len)
    }

    pub fn skip_count(&self, group_key: &str) -> u32 {
        self.skip_counters.get(group_key).copied().unwrap_or(0)
    }

    /// Priority of the task at the head of the global ordering
    pub fn peek_priority(&self) -> Option<i32> {
        self.ordering.first().map(|key| key.priority.0)
    }

    /// Priorities of every queued task in global order
    pub fn queued_priorities(&self) -> Vec<i32> {
        self.ordering.iter().map(|key| key.priority.0).collect()
    }

    /// Priorities of one group's queued tasks in group order
    pub fn group_priorities(&self, group_key: &str) -> Vec<i32> {
        self.groups
            .get(group_key)
            .map(|keys| keys.iter().map(|key| key.priority.0).collect())
            .unwrap_or_default()
    }

    fn insert(&mut self, task: SimulationTask) {
        let key = QueueKey {
            priority: Reverse(task.priority),
            seq: self.next_seq,
        };
        self.next_seq += 1;

        self.ordering.insert(key);
        self.groups
            .entry(task.settings_group_key.clone())
            .or_default()
            .insert(key);
        self.tasks.insert(key.seq, task);
    }

    /// Take a task out of every index, dropping its group entry once empty
    fn detach(&mut self, key: QueueKey) -> Option<SimulationTask> {
        let task = self.tasks.remove(&key.seq)?;
        self.ordering.remove(&key);

        if let Some(group) = self.groups.get_mut(&task.settings_group_key) {
            group.remove(&key);
            if group.is_empty() {
                self.groups.remove(&task.settings_group_key);
            }
        }
        Some(task)
    }

    /// Raise every task of each group whose counter reached the threshold by one
    fn promote_low_priority_tasks(&mut self) {
        let threshold = self.config.low_priority_threshold;
        let due: Vec<String> = self
            .skip_counters
            .iter()
            .filter(|(_, count)| **count >= threshold)
            .map(|(group, _)| group.clone())
            .collect();

        for group_key in due {
            self.skip_counters.insert(group_key.clone(), 0);

            let Some(keys) = self.groups.remove(&group_key) else {
                continue;
            };

            let mut promoted = BTreeSet::new();
            for key in keys {
                self.ordering.remove(&key);
                let Some(task) = self.tasks.get_mut(&key.seq) else {
                    continue;
                };
                task.priority += 1;

                let new_key = QueueKey {
                    priority: Reverse(task.priority),
                    seq: key.seq,
                };
                self.ordering.insert(new_key);
                promoted.insert(new_key);
            }

            info!(
                phase = "schedule",
                group = %group_key,
                promoted = promoted.len(),
                "Promoted low priority group"
            );
            self.groups.insert(group_key, promoted);
        }
    }

    fn take_batch(&mut self, batch_size: usize) -> Vec<SimulationTask> {
        let Some(&head) = self.ordering.first() else {
            return Vec::new();
        };

        if batch_size == 1 {
            return self.detach(head).into_iter().collect();
        }

        let Some(group_key) = self
            .tasks
            .get(&head.seq)
            .map(|task| task.settings_group_key.clone())
        else {
            return Vec::new();
        };

        let keys: Vec<QueueKey> = self
            .groups
            .get(&group_key)
            .map(|group| group.iter().take(batch_size).copied().collect())
            .unwrap_or_default();

        let batch: Vec<SimulationTask> = keys.into_iter().filter_map(|key| self.detach(key)).collect();
        *self.skip_counters.entry(group_key).or_insert(0) += 1;
        batch
    }

    async fn acknowledge(&self, batch: &[SimulationTask]) {
        let Some(provider) = &self.provider else {
            return;
        };

        let ids: Vec<TaskId> = batch.iter().map(|task| task.id).collect();
        if let Err(e) = provider.acknowledge_scheduled_tasks(&ids).await {
            warn!(phase = "schedule", "Failed to acknowledge scheduled tasks {:?}: {}", ids, e);
        }
    }
}

#[async_trait::async_trait]
impl Scheduler for PriorityScheduler {
    fn set_task_provider(&mut self, provider: Arc<dyn TaskProvider>) {
        self.provider = Some(provider);
    }

    fn add_tasks(&mut self, tasks: Vec<SimulationTask>) {
        if tasks.is_empty() {
            return;
        }

        let count = tasks.len();
        for task in tasks {
            self.insert(task);
        }
        debug!("Queued {} tasks, {} in working set", count, self.len());
    }

    async fn fetch_tasks_from_provider(&mut self) -> Result<usize, SchedulerError> {
        let Some(provider) = self.provider.clone() else {
            return Ok(0);
        };

        let tasks = provider
            .fetch_tasks(self.config.fetch_size, self.config.fetch_priority)
            .await?;
        let fetched = tasks.len();
        self.add_tasks(tasks);
        Ok(fetched)
    }

    async fn has_tasks(&mut self) -> bool {
        if self.is_empty() {
            if let Err(e) = self.fetch_tasks_from_provider().await {
                warn!(phase = "schedule", "Refill failed: {}", e);
            }
        }
        !self.is_empty()
    }

    async fn schedule(&mut self, batch_size: usize) -> Result<Vec<SimulationTask>, SchedulerError> {
        if batch_size == 0 {
            return Err(SchedulerError::InvalidBatchSize);
        }

        if self.is_empty() {
            let fetched = self.fetch_tasks_from_provider().await?;
            debug!(phase = "schedule", "Refilled working set with {} tasks", fetched);
        }
        if self.is_empty() {
            return Err(SchedulerError::NoTasksAvailable);
        }

        self.promote_low_priority_tasks();

        let mut batch = self.take_batch(batch_size);

        // A non-pending task was already claimed elsewhere; drop the batch and let the store decide
        if let Some(task) = batch.iter().find(|task| task.status != TaskStatus::Pending) {
            return Err(SchedulerError::InvalidStatus {
                task_id: task.id,
                status: task.status,
            });
        }

        for task in &mut batch {
            task.transition_to(TaskStatus::Scheduled)
                .map_err(|e| SchedulerError::InvalidStatus {
                    task_id: e.task_id,
                    status: e.from,
                })?;
        }

        self.acknowledge(&batch).await;

        info!(
            phase = "schedule",
            batch = batch.len(),
            requested = batch_size,
            remaining = self.len(),
            "Scheduled batch"
        );
        Ok(batch)
    }
}
