//! Task file parsing
//!
//! A task file is TOML with one `[[tasks]]` table per simulation:
//!
//! ```toml
//! [[tasks]]
//! regular = "rank(close)"
//! priority = 5
//! tags = ["momentum"]
//!
//! [tasks.settings]
//! instrument_type = "EQUITY"
//! region = "USA"
//! universe = "TOP3000"
//! delay = 1
//! ```

use crate::task::{SettingsError, SimulationSettings, SimulationTask};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum TaskFileError {
    #[error("File '{path}' not found")]
    NotFound { path: PathBuf },

    #[error("IO error reading '{path}': {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Task parsing error in '{path}': {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Task {index} in '{path}' has an empty expression")]
    EmptyExpression { path: PathBuf, index: usize },

    #[error("Task {index} in '{path}' has invalid settings: {source}")]
    InvalidSettings {
        path: PathBuf,
        index: usize,
        source: SettingsError,
    },
}

#[derive(Debug, Deserialize)]
struct TaskFile {
    #[serde(default)]
    tasks: Vec<TaskEntry>,
}

#[derive(Debug, Deserialize)]
struct TaskEntry {
    regular: String,
    #[serde(default)]
    priority: i32,
    #[serde(default)]
    tags: Vec<String>,
    description: Option<String>,
    settings: SimulationSettings,
}

/// Loads simulation tasks from TOML task files
pub struct TaskFileLoader;

impl TaskFileLoader {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Vec<SimulationTask>, TaskFileError> {
        let path = path.as_ref().to_path_buf();
        debug!("Loading task file: {:?}", path);

        let content = fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => TaskFileError::NotFound { path: path.clone() },
            _ => TaskFileError::IoError {
                path: path.clone(),
                source: e,
            },
        })?;

        Self::parse_str(&content, &path)
    }

    /// Parse task file content; duplicate expressions with identical settings are dropped
    pub fn parse_str(content: &str, source_path: &Path) -> Result<Vec<SimulationTask>, TaskFileError> {
        let file: TaskFile = toml::from_str(content).map_err(|e| TaskFileError::ParseError {
            path: source_path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut seen = HashSet::new();
        let mut tasks = Vec::with_capacity(file.tasks.len());
        for (index, entry) in file.tasks.into_iter().enumerate() {
            let regular = entry.regular.trim();
            if regular.is_empty() {
                return Err(TaskFileError::EmptyExpression {
                    path: source_path.to_path_buf(),
                    index,
                });
            }

            let mut task = SimulationTask::new(regular, entry.settings, entry.priority)
                .map_err(|source| TaskFileError::InvalidSettings {
                    path: source_path.to_path_buf(),
                    index,
                    source,
                })?
                .with_tags(entry.tags);
            if let Some(description) = entry.description {
                task = task.with_description(description);
            }

            if !seen.insert(task.signature.clone()) {
                warn!("Skipping duplicate task {} in {:?}", index, source_path);
                continue;
            }
            tasks.push(task);
        }

        debug!("Parsed {} tasks from {:?}", tasks.len(), source_path);
        Ok(tasks)
    }
}
