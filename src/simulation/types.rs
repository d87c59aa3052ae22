use crate::task::settings::SimulationSettings;
use crate::task::types::{SimulationTask, TaskId, TaskStatus, TaskType};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Largest multi-job submission an elevated operator may make
pub const MAX_ELEVATED_JOBS: usize = 10;

/// One job as sent to the remote service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationRequest {
    pub task_id: TaskId,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub regular: String,
    pub settings: SimulationSettings,
}

impl From<&SimulationTask> for SimulationRequest {
    fn from(task: &SimulationTask) -> Self {
        Self {
            task_id: task.id,
            task_type: task.task_type,
            regular: task.regular.clone(),
            settings: task.settings.clone(),
        }
    }
}

/// Reply to a submission
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub accepted: bool,
    pub progress_id: Option<String>,
    pub retry_after: Duration,
}

impl SubmitOutcome {
    pub fn accepted(progress_id: impl Into<String>, retry_after: Duration) -> Self {
        Self {
            accepted: true,
            progress_id: Some(progress_id.into()),
            retry_after,
        }
    }

    pub fn rejected() -> Self {
        Self {
            accepted: false,
            progress_id: None,
            retry_after: Duration::ZERO,
        }
    }

    /// Handle to poll, present only when the service took the job
    pub fn handle(&self) -> Option<&str> {
        if self.accepted {
            self.progress_id.as_deref().filter(|id| !id.is_empty())
        } else {
            None
        }
    }
}

/// Reply to a progress poll
#[derive(Debug, Clone)]
pub enum PollOutcome<T> {
    Running {
        progress: Option<f64>,
        retry_after: Duration,
    },
    Finished(T),
}

/// Outcome the remote service reports for one simulation
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SimulationResultStatus {
    Complete,
    Warning,
    Error,
    Fail,
    Timeout,
    Cancelled,
}

impl SimulationResultStatus {
    /// Task status this outcome settles to
    pub fn task_status(&self) -> TaskStatus {
        match self {
            SimulationResultStatus::Complete | SimulationResultStatus::Warning => {
                TaskStatus::Complete
            }
            SimulationResultStatus::Cancelled => TaskStatus::Cancelled,
            _ => TaskStatus::Error,
        }
    }
}

/// Result of a finished single simulation or multi-job child
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SimulationResult {
    pub id: String,
    pub status: SimulationResultStatus,
    pub alpha: Option<String>,
    pub message: Option<String>,
    pub parent: Option<String>,
    pub regular: Option<String>,
    pub settings: Option<serde_json::Value>,
}

impl SimulationResult {
    pub fn task_status(&self) -> TaskStatus {
        self.status.task_status()
    }
}

/// Result of a finished multi-job: child handles in submission order
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct MultiSimulationResult {
    pub children: Vec<String>,
    pub status: SimulationResultStatus,
}

/// How many jobs the operator's session may submit at once
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubmissionCapability {
    pub max_jobs: usize,
}

impl SubmissionCapability {
    pub const BASIC: Self = Self { max_jobs: 1 };
    pub const ELEVATED: Self = Self {
        max_jobs: MAX_ELEVATED_JOBS,
    };

    pub fn new(max_jobs: usize) -> Self {
        Self {
            max_jobs: max_jobs.clamp(1, MAX_ELEVATED_JOBS),
        }
    }

    pub fn allows_multi(&self) -> bool {
        self.max_jobs > 1
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SimulationError {
    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },
    #[error("Network error: {0}")]
    Network(String),
    #[error("Authentication failed: {0}")]
    AuthenticationFailure(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Unknown progress id: {0}")]
    NotFound(String),
    #[error("Unknown error: {0}")]
    Unknown(String),
}
