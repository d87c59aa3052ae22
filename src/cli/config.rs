//! Configuration discovery and loading
//!
//! This module handles the configuration discovery hierarchy:
//! 1. Current directory: ./simdispatch.toml or ./.simdispatch/config.toml
//! 2. User config: ~/.simdispatch/config.toml
//! 3. System config: /etc/simdispatch/config.toml
//! 4. Built-in defaults

use crate::env;
use crate::pool::PoolConfig;
use crate::simulation::DryRunConfig;
use crate::task::SchedulerConfig;
use crate::worker::WorkerConfig;
use anyhow::{Context, anyhow, bail};
use serde::{Deserialize, Serialize};
use std::env as std_env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub scheduler: SchedulerConfig,
    pub worker: WorkerConfig,
    pub pool: PoolConfig,
    pub dry_run: DryRunConfig,
}

impl DispatcherConfig {
    /// Load from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config file {:?}", path))?;
        Self::from_toml_str(&content).with_context(|| format!("parsing config file {:?}", path))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: DispatcherConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save to TOML file
    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject settings that would leave the dispatcher unable to make progress
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.scheduler.fetch_size == 0 {
            bail!("scheduler.fetch_size must be at least 1");
        }
        if self.scheduler.low_priority_threshold == 0 {
            bail!("scheduler.low_priority_threshold must be at least 1");
        }
        self.pool.validate()?;
        if !(0.0..=1.0).contains(&self.dry_run.failure_rate) {
            bail!("dry_run.failure_rate must be between 0 and 1");
        }
        Ok(())
    }
}

/// Configuration discovery system
pub struct ConfigDiscovery;

impl ConfigDiscovery {
    /// Discover and load configuration using the hierarchy
    pub fn discover_config() -> anyhow::Result<DispatcherConfig> {
        if let Some(config_path) = Self::find_config_file() {
            info!("Loading configuration from: {:?}", config_path);
            return DispatcherConfig::from_toml_file(config_path);
        }

        info!("No configuration file found, using defaults");
        Ok(DispatcherConfig::default())
    }

    /// Find configuration file using discovery hierarchy
    pub fn find_config_file() -> Option<PathBuf> {
        for candidate in Self::get_config_candidates() {
            debug!("Checking for config file: {:?}", candidate);
            if candidate.is_file() {
                debug!("Found config file: {:?}", candidate);
                return Some(candidate);
            }
        }

        debug!("No config file found in discovery hierarchy");
        None
    }

    /// Configuration file candidates in priority order
    pub fn get_config_candidates() -> Vec<PathBuf> {
        let mut candidates = Vec::new();

        if let Ok(current_dir) = std_env::current_dir() {
            candidates.push(current_dir.join(env::LOCAL_CONFIG_FILE_NAME));
            candidates.push(env::local_config_file_path(&current_dir));
        }

        if let Some(home_dir) = Self::get_home_dir() {
            candidates.push(env::user_config_file_path(&home_dir));
        }

        #[cfg(unix)]
        candidates.push(env::system_config_file_path());

        candidates
    }

    fn get_home_dir() -> Option<PathBuf> {
        std_env::var("HOME")
            .ok()
            .or_else(|| std_env::var("USERPROFILE").ok())
            .map(PathBuf::from)
    }

    /// Write a default config file, to `path` or else the user's home directory
    pub fn create_default_config(path: Option<&Path>) -> anyhow::Result<PathBuf> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let home_dir = Self::get_home_dir()
                    .ok_or_else(|| anyhow!("could not determine home directory"))?;
                env::user_config_file_path(&home_dir)
            }
        };

        if let Some(config_dir) = config_path.parent()
            && !config_dir.as_os_str().is_empty()
            && !config_dir.exists()
        {
            fs::create_dir_all(config_dir)?;
            info!("Created configuration directory: {:?}", config_dir);
        }

        if config_path.exists() {
            warn!("Configuration file already exists: {:?}", config_path);
        } else {
            DispatcherConfig::default().to_toml_file(&config_path)?;
            info!("Created default configuration file: {:?}", config_path);
        }

        Ok(config_path)
    }

    /// Show configuration discovery information for debugging
    pub fn show_discovery_info() {
        println!("Configuration Discovery Hierarchy:");
        println!();

        for (i, candidate) in Self::get_config_candidates().iter().enumerate() {
            let status = if candidate.exists() {
                if candidate.is_file() {
                    "✓ EXISTS"
                } else {
                    "✗ NOT A FILE"
                }
            } else {
                "✗ NOT FOUND"
            };

            println!("  {}. {:?} - {}", i + 1, candidate, status);
        }

        println!();
        if let Some(found) = Self::find_config_file() {
            println!("Active configuration: {:?}", found);
        } else {
            println!("Active configuration: Built-in defaults");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_config_serialization() {
        let config = DispatcherConfig::default();
        let toml_string = config.to_toml_string().unwrap();

        let deserialized = DispatcherConfig::from_toml_str(&toml_string).unwrap();
        assert_eq!(deserialized.scheduler.fetch_size, config.scheduler.fetch_size);
        assert_eq!(deserialized.pool.worker_timeout, config.pool.worker_timeout);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = DispatcherConfig::from_toml_str(
            r#"
            [scheduler]
            fetch_size = 25
            low_priority_threshold = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.scheduler.fetch_size, 25);
        assert_eq!(config.scheduler.low_priority_threshold, 3);
        assert_eq!(config.pool.initial_workers, 1);
        assert_eq!(config.worker.idle_poll_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        let mut config = DispatcherConfig::default();
        config.scheduler.fetch_size = 0;
        assert!(config.validate().is_err());

        let mut config = DispatcherConfig::default();
        config.scheduler.low_priority_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = DispatcherConfig::default();
        config.pool.initial_workers = 0;
        assert!(config.validate().is_err());

        let mut config = DispatcherConfig::default();
        config.dry_run.failure_rate = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_create_default_config_at_path() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("simdispatch.toml");

        let created = ConfigDiscovery::create_default_config(Some(&config_path)).unwrap();
        assert_eq!(created, config_path);
        assert!(config_path.exists());

        let loaded = DispatcherConfig::from_toml_file(&config_path).unwrap();
        assert_eq!(loaded.pool.initial_workers, 1);
    }

    #[test]
    fn test_config_candidates() {
        let candidates = ConfigDiscovery::get_config_candidates();

        assert!(!candidates.is_empty());
        assert!(candidates[0].file_name().unwrap() == "simdispatch.toml");
    }
}
