//! CLI-specific functionality for the dispatcher
//!
//! This module contains argument parsing, task file loading and
//! configuration discovery.

pub mod args;
pub mod config;
pub mod tasks;

pub use args::{Args, Commands, DryRunArgs, ExecutionMode};
pub use config::{ConfigDiscovery, DispatcherConfig};
pub use tasks::{TaskFileError, TaskFileLoader};
