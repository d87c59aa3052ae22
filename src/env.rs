//! Environment constants and path utilities for the dispatcher.
//!
//! Directory and file names used by configuration discovery live here so
//! the CLI and tests agree on them.

use std::path::{Path, PathBuf};

/// Per-user and per-project directory name
pub const SIMDISPATCH_DIR_NAME: &str = ".simdispatch";

/// Configuration file name inside the directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Stand-alone configuration file looked up in the working directory
pub const LOCAL_CONFIG_FILE_NAME: &str = "simdispatch.toml";

/// System-wide configuration directory
pub const SYSTEM_CONFIG_DIR: &str = "/etc/simdispatch";

/// Log filter used when `RUST_LOG` is not set
pub const DEFAULT_LOG_FILTER: &str = "simdispatch=info";

/// Build config directory path in user's home directory
pub fn user_config_dir_path(home_dir: &Path) -> PathBuf {
    home_dir.join(SIMDISPATCH_DIR_NAME)
}

/// Build config file path in user's home directory
pub fn user_config_file_path(home_dir: &Path) -> PathBuf {
    user_config_dir_path(home_dir).join(CONFIG_FILE_NAME)
}

/// Build local config file path in current directory
pub fn local_config_file_path(current_dir: &Path) -> PathBuf {
    current_dir.join(SIMDISPATCH_DIR_NAME).join(CONFIG_FILE_NAME)
}

pub fn system_config_file_path() -> PathBuf {
    Path::new(SYSTEM_CONFIG_DIR).join(CONFIG_FILE_NAME)
}
