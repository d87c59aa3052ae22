use crate::task::settings::{SettingsError, SimulationSettings};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Store-assigned task identifier; zero until the task has been persisted
pub type TaskId = i64;

/// Lifecycle state of a simulation task
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Waiting in the store to be picked up by a scheduler
    Pending,
    /// Handed to a worker, not yet submitted
    Scheduled,
    /// Submitted to the remote service and being polled
    Running,
    /// Remote simulation finished successfully
    Complete,
    /// Submission, polling or the simulation itself failed
    Error,
    /// Remote job was cancelled on shutdown
    Cancelled,
}

/// Kind of simulation job
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    #[default]
    Regular,
}

/// Rejected status change
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("task {task_id} cannot move from {from} to {to}")]
pub struct StatusTransitionError {
    pub task_id: TaskId,
    pub from: TaskStatus,
    pub to: TaskStatus,
}

/// Unit of schedulable simulation work
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SimulationTask {
    pub id: TaskId,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub priority: i32,
    pub settings_group_key: String,
    pub signature: String,
    pub regular: String,
    pub settings: SimulationSettings,
    pub parent_progress_id: Option<String>,
    pub child_progress_id: Option<String>,
    pub alpha_id: Option<String>,
    pub result: Option<serde_json::Value>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub dependencies: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl SimulationTask {
    /// Build a pending task from a job expression and validated settings
    pub fn new(
        regular: impl Into<String>,
        settings: SimulationSettings,
        priority: i32,
    ) -> Result<Self, SettingsError> {
        settings.validate()?;

        let regular = regular.into();
        let now = Utc::now();
        Ok(Self {
            id: 0,
            task_type: TaskType::Regular,
            status: TaskStatus::Pending,
            priority,
            settings_group_key: settings.settings_group_key(),
            signature: task_signature(&regular, &settings),
            regular,
            settings,
            parent_progress_id: None,
            child_progress_id: None,
            alpha_id: None,
            result: None,
            description: None,
            tags: Vec::new(),
            dependencies: None,
            created_at: now,
            scheduled_at: None,
            updated_at: now,
            completed_at: None,
            deleted_at: None,
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_dependencies(mut self, dependencies: serde_json::Value) -> Self {
        self.dependencies = Some(dependencies);
        self
    }

    /// Move to `status`, stamping `updated_at` and, for terminal states, `completed_at`
    pub fn transition_to(&mut self, status: TaskStatus) -> Result<(), StatusTransitionError> {
        if !self.status.can_transition_to(status) {
            return Err(StatusTransitionError {
                task_id: self.id,
                from: self.status,
                to: status,
            });
        }

        let now = Utc::now();
        if status == TaskStatus::Scheduled {
            self.scheduled_at = Some(now);
        }
        if status.is_terminal() {
            self.completed_at = Some(now);
        }
        self.status = status;
        self.updated_at = now;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

impl TaskStatus {
    fn rank(&self) -> u8 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::Scheduled => 1,
            TaskStatus::Running => 2,
            TaskStatus::Complete | TaskStatus::Error | TaskStatus::Cancelled => 3,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 3
    }

    /// Status only ever moves forward; terminal states are final
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Scheduled => "SCHEDULED",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Complete => "COMPLETE",
            TaskStatus::Error => "ERROR",
            TaskStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content hash of a job expression and its settings, used for de-duplication
pub fn task_signature(regular: &str, settings: &SimulationSettings) -> String {
    // Struct serialization has a fixed field order, so the JSON is canonical
    let settings_json = serde_json::to_string(settings).unwrap_or_default();
    let hash = Sha256::digest(format!("{}_{}", regular, settings_json).as_bytes());
    hex::encode(hash)
}
