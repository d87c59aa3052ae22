use crate::task::{SimulationTask, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// Number of recent task durations kept for the rolling average
pub const DURATION_WINDOW: usize = 100;

#[derive(Debug, Clone, thiserror::Error)]
pub enum PoolError {
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),
}

/// Worker pool configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Workers created by `start`
    pub initial_workers: usize,
    /// Silence after which a worker is restarted; zero disables health checks
    pub worker_timeout: Duration,
    /// Defaults to a tenth of `worker_timeout`, kept within 5..=30 seconds
    pub health_check_interval: Option<Duration>,
    /// Bound on waiting for worker loops during `stop`
    pub stop_timeout: Duration,
    /// Bound on waiting for a single worker loop during restart or scale-down
    pub restart_timeout: Duration,
    /// Period of the status log line; zero disables it
    pub status_log_interval: Duration,
    /// Pause between starting consecutive workers
    pub worker_start_delay: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_workers: 1,
            worker_timeout: Duration::from_secs(300),
            health_check_interval: None,
            stop_timeout: Duration::from_secs(30),
            restart_timeout: Duration::from_secs(5),
            status_log_interval: Duration::from_secs(60),
            worker_start_delay: Duration::ZERO,
        }
    }
}

impl PoolConfig {
    pub fn health_check_enabled(&self) -> bool {
        !self.worker_timeout.is_zero()
    }

    pub fn effective_health_check_interval(&self) -> Duration {
        self.health_check_interval.unwrap_or_else(|| {
            (self.worker_timeout / 10).clamp(Duration::from_secs(5), Duration::from_secs(30))
        })
    }

    pub fn validate(&self) -> Result<(), PoolError> {
        if self.initial_workers == 0 {
            return Err(PoolError::InvalidConfig(
                "initial_workers must be at least 1".to_string(),
            ));
        }
        if self.health_check_interval.is_some_and(|i| i.is_zero()) {
            return Err(PoolError::InvalidConfig(
                "health_check_interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Counters fed by worker completion callbacks
#[derive(Debug, Default)]
pub struct PoolStats {
    pub processed: u64,
    pub failed: u64,
    durations: VecDeque<Duration>,
}

impl PoolStats {
    pub fn record(&mut self, task: &SimulationTask) {
        self.processed += 1;
        if task.status != TaskStatus::Complete {
            self.failed += 1;
        }

        let elapsed = task
            .scheduled_at
            .zip(task.completed_at)
            .and_then(|(start, end)| (end - start).to_std().ok());
        if let Some(elapsed) = elapsed {
            if self.durations.len() == DURATION_WINDOW {
                self.durations.pop_front();
            }
            self.durations.push_back(elapsed);
        }
    }

    pub fn average_duration(&self) -> Option<Duration> {
        if self.durations.is_empty() {
            return None;
        }
        let total: Duration = self.durations.iter().sum();
        Some(total / self.durations.len() as u32)
    }

    pub fn success_rate(&self) -> Option<f64> {
        (self.processed > 0)
            .then(|| (self.processed - self.failed) as f64 / self.processed as f64)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Point-in-time view of a pool
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub running: bool,
    pub worker_count: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub uptime: Duration,
    pub processed: u64,
    pub failed: u64,
    pub success_rate: Option<f64>,
    pub avg_task_duration: Option<Duration>,
    /// Only reported once the pool has been up for a minute
    pub tasks_per_minute: Option<f64>,
    pub health_check_enabled: bool,
    pub health_check_interval: Option<Duration>,
}
