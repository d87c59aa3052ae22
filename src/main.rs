use anyhow::Context;
use simdispatch::cli::{Args, ConfigDiscovery, DispatcherConfig, DryRunArgs, ExecutionMode, TaskFileLoader};
use simdispatch::simulation::DryRunClient;
use simdispatch::task::{InMemoryTaskStore, TaskStore};
use simdispatch::{DispatchSystem, env};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(env::DEFAULT_LOG_FILTER)),
        )
        .init();

    let args = Args::parse();
    let mode = match args.mode() {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    match mode {
        ExecutionMode::DryRun(config) => run_dry_run(config).await,
        ExecutionMode::Validate(path) => validate_tasks(&path),
        ExecutionMode::ShowConfig => {
            ConfigDiscovery::show_discovery_info();
            let config = ConfigDiscovery::discover_config()?;
            println!();
            println!("{}", config.to_toml_string()?);
            Ok(())
        }
        ExecutionMode::InitConfig(path) => {
            let created = ConfigDiscovery::create_default_config(path.as_deref())?;
            println!("Configuration written to {:?}", created);
            Ok(())
        }
    }
}

fn load_config(override_path: Option<&Path>) -> anyhow::Result<DispatcherConfig> {
    match override_path {
        Some(path) => {
            info!("Loading configuration override from: {:?}", path);
            DispatcherConfig::from_toml_file(path)
        }
        None => ConfigDiscovery::discover_config(),
    }
}

fn validate_tasks(path: &Path) -> anyhow::Result<()> {
    let tasks = TaskFileLoader::load(path)?;
    let mut groups: Vec<&str> = tasks.iter().map(|t| t.settings_group_key.as_str()).collect();
    groups.sort_unstable();
    groups.dedup();

    println!(
        "{:?}: {} tasks in {} settings groups",
        path,
        tasks.len(),
        groups.len()
    );
    for group in groups {
        println!("  {}", group);
    }
    Ok(())
}

async fn run_dry_run(args: DryRunArgs) -> anyhow::Result<()> {
    let mut config = load_config(args.config_override.as_deref())?;
    if let Some(workers) = args.workers {
        config.pool.initial_workers = workers;
    }
    config.validate()?;

    let tasks = TaskFileLoader::load(&args.tasks_file)
        .with_context(|| format!("loading tasks from {:?}", args.tasks_file))?;
    info!("Loaded {} tasks from {:?}", tasks.len(), args.tasks_file);

    let store = Arc::new(InMemoryTaskStore::new());
    let factory = DryRunClient::factory(config.dry_run.clone());
    let system = DispatchSystem::new(config, store.clone(), factory);

    system.submit_tasks(tasks).await?;
    system.start().await?;

    let status = system
        .run_until_drained(Duration::from_millis(500), tokio::signal::ctrl_c())
        .await?;

    if args.verbose {
        let all = store.find_tasks(&Default::default()).await?;
        for task in all {
            println!(
                "  #{} [{}] p{} {} alpha={}",
                task.id,
                task.status,
                task.priority,
                task.regular,
                task.alpha_id.as_deref().unwrap_or("-")
            );
        }
    }

    for (status, count) in system.task_counts().await? {
        if count > 0 {
            println!("{}: {}", status, count);
        }
    }
    match serde_json::to_string_pretty(&status) {
        Ok(json) => println!("{}", json),
        Err(e) => error!("Failed to render pool status: {}", e),
    }
    Ok(())
}
