//! Command line argument parsing
//!
//! Subcommands:
//! - `dry-run`: Dispatch a task file against the in-process dry-run service
//! - `validate`: Check a task file without dispatching it
//! - `show-config`: Show configuration discovery information
//! - `init-config`: Write a default configuration file

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug)]
pub enum ExecutionMode {
    DryRun(DryRunArgs),
    Validate(PathBuf),
    ShowConfig,
    InitConfig(Option<PathBuf>),
}

#[derive(Debug)]
pub struct DryRunArgs {
    pub tasks_file: PathBuf,
    pub config_override: Option<PathBuf>,
    pub workers: Option<usize>,
    pub verbose: bool,
}

#[derive(Debug, Parser)]
#[command(name = "simdispatch")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Priority scheduling and dispatch of simulation jobs to a remote compute service")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Dispatch a task file against the in-process dry-run service
    DryRun {
        /// TOML task file
        tasks: PathBuf,
        /// Configuration file path
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
        /// Override the number of initial workers
        #[arg(short = 'w', long = "workers")]
        workers: Option<usize>,
        /// Print every task outcome
        #[arg(short = 'v', long = "verbose")]
        verbose: bool,
    },
    /// Parse and validate a task file
    Validate {
        /// TOML task file
        tasks: PathBuf,
    },
    /// Show configuration discovery information
    ShowConfig,
    /// Write a default configuration file
    InitConfig {
        /// Destination, defaults to ~/.simdispatch/config.toml
        path: Option<PathBuf>,
    },
}

impl Args {
    pub fn parse() -> Self {
        Parser::parse()
    }

    pub fn mode(&self) -> Result<ExecutionMode, String> {
        match &self.command {
            Some(Commands::DryRun {
                tasks,
                config,
                workers,
                verbose,
            }) => {
                if *workers == Some(0) {
                    return Err("--workers must be at least 1".to_string());
                }
                Ok(ExecutionMode::DryRun(DryRunArgs {
                    tasks_file: tasks.clone(),
                    config_override: config.clone(),
                    workers: *workers,
                    verbose: *verbose,
                }))
            }
            Some(Commands::Validate { tasks }) => Ok(ExecutionMode::Validate(tasks.clone())),
            Some(Commands::ShowConfig) => Ok(ExecutionMode::ShowConfig),
            Some(Commands::InitConfig { path }) => Ok(ExecutionMode::InitConfig(path.clone())),
            None => Err(
                "No command specified. Use 'simdispatch --help' to see available commands."
                    .to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dry_run_command() {
        let args = Args::try_parse_from([
            "simdispatch",
            "dry-run",
            "tasks.toml",
            "--workers",
            "3",
            "-v",
        ])
        .unwrap();

        if let ExecutionMode::DryRun(config) = args.mode().unwrap() {
            assert_eq!(config.tasks_file, PathBuf::from("tasks.toml"));
            assert_eq!(config.workers, Some(3));
            assert!(config.verbose);
            assert!(config.config_override.is_none());
        } else {
            panic!("Expected DryRun mode");
        }
    }

    #[test]
    fn test_zero_workers_rejected() {
        let args = Args {
            command: Some(Commands::DryRun {
                tasks: PathBuf::from("tasks.toml"),
                config: None,
                workers: Some(0),
                verbose: false,
            }),
        };
        assert!(args.mode().is_err());
    }

    #[test]
    fn test_init_config_with_and_without_path() {
        let args = Args::try_parse_from(["simdispatch", "init-config"]).unwrap();
        assert!(matches!(args.mode().unwrap(), ExecutionMode::InitConfig(None)));

        let args = Args::try_parse_from(["simdispatch", "init-config", "./local.toml"]).unwrap();
        assert!(matches!(
            args.mode().unwrap(),
            ExecutionMode::InitConfig(Some(path)) if path == PathBuf::from("./local.toml")
        ));
    }

    #[test]
    fn test_validate_and_show_config() {
        let args = Args::try_parse_from(["simdispatch", "validate", "tasks.toml"]).unwrap();
        assert!(matches!(args.mode().unwrap(), ExecutionMode::Validate(_)));

        let args = Args::try_parse_from(["simdispatch", "show-config"]).unwrap();
        assert!(matches!(args.mode().unwrap(), ExecutionMode::ShowConfig));
    }

    #[test]
    fn test_no_command_error() {
        let args = Args { command: None };
        assert!(args.mode().is_err());
    }
}
