use simdispatch::cli::{DispatcherConfig, TaskFileLoader};
use simdispatch::pool::WorkerPool;
use simdispatch::simulation::{ClientFactory, DryRunClient, DryRunConfig, SimulationClient};
use simdispatch::task::*;
use simdispatch::DispatchSystem;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const TASK_FILE: &str = r#"
[[tasks]]
regular = "rank(close)"
priority = 10
tags = ["e2e"]
[tasks.settings]
instrument_type = "EQUITY"
region = "USA"
universe = "TOP3000"
delay = 1

[[tasks]]
regular = "rank(open)"
priority = 20
[tasks.settings]
instrument_type = "EQUITY"
region = "USA"
universe = "TOP3000"
delay = 1

[[tasks]]
regular = "ts_rank(volume, 10)"
priority = 30
[tasks.settings]
instrument_type = "EQUITY"
region = "USA"
universe = "TOP1000"
delay = 0

[[tasks]]
regular = "ts_rank(volume, 20)"
priority = 40
[tasks.settings]
instrument_type = "EQUITY"
region = "USA"
universe = "TOP1000"
delay = 0

[[tasks]]
regular = "group_rank(returns, sector)"
priority = 50
[tasks.settings]
instrument_type = "EQUITY"
region = "EUR"
universe = "TOP2500"
delay = 1
"#;

fn fast_config(workers: usize) -> DispatcherConfig {
    let mut config = DispatcherConfig::default();
    config.worker.idle_poll_interval = Duration::from_millis(10);
    config.worker.min_poll_interval = Duration::from_millis(1);
    config.worker.cancel_jitter = Duration::ZERO;
    config.worker.child_poll_interval = Duration::from_millis(1);
    config.pool.initial_workers = workers;
    config.pool.status_log_interval = Duration::ZERO;
    config.dry_run = DryRunConfig {
        polls_until_done: 2,
        retry_after: Duration::from_millis(1),
        ..DryRunConfig::default()
    };
    config
}

#[tokio::test]
async fn test_pool_drains_task_file() {
    let tasks = TaskFileLoader::parse_str(TASK_FILE, Path::new("e2e.toml")).unwrap();
    assert_eq!(tasks.len(), 5);

    let config = fast_config(2);
    let store = Arc::new(InMemoryTaskStore::new());
    let factory = DryRunClient::factory(config.dry_run.clone());
    let system = DispatchSystem::new(config, store.clone(), factory);

    system.submit_tasks(tasks).await.unwrap();
    assert_eq!(system.outstanding().await.unwrap(), 5);
    system.start().await.unwrap();

    let status = tokio::time::timeout(
        Duration::from_secs(10),
        system.run_until_drained(Duration::from_millis(10), std::future::pending::<()>()),
    )
    .await
    .expect("tasks did not drain")
    .unwrap();

    assert_eq!(store.count_by_status(TaskStatus::Complete), 5);
    assert_eq!(status.processed, 5);
    assert_eq!(status.failed, 0);
    assert!(!status.running);
    assert_eq!(system.pool().worker_count().await, 0);

    let settled = store.find_tasks(&TaskFilter::default()).await.unwrap();
    for task in settled {
        assert!(task.alpha_id.is_some());
        assert!(task.scheduled_at.is_some());
        assert!(task.completed_at.is_some());
        assert!(task.parent_progress_id.is_some());
    }
}

#[tokio::test]
async fn test_basic_sessions_submit_single_jobs() {
    let tasks = TaskFileLoader::parse_str(TASK_FILE, Path::new("e2e.toml")).unwrap();
    let config = fast_config(1);

    let client = Arc::new(DryRunClient::new(config.dry_run.clone()));
    client.set_capability(Some(simdispatch::SubmissionCapability::BASIC));
    let shared = client.clone();
    let factory: ClientFactory = Arc::new(move || shared.clone() as Arc<dyn SimulationClient>);

    let store = Arc::new(InMemoryTaskStore::new());
    let system = DispatchSystem::new(config, store.clone(), factory);
    system.submit_tasks(tasks).await.unwrap();
    system.start().await.unwrap();

    tokio::time::timeout(
        Duration::from_secs(10),
        system.run_until_drained(Duration::from_millis(10), std::future::pending::<()>()),
    )
    .await
    .expect("tasks did not drain")
    .unwrap();

    let calls = client.calls();
    assert_eq!(calls.submit_single, 5);
    assert_eq!(calls.submit_multi, 0);
    assert_eq!(store.count_by_status(TaskStatus::Complete), 5);

    // the highest priority task was dispatched first
    let settled = store.find_tasks(&TaskFilter::default()).await.unwrap();
    let first = settled.iter().min_by_key(|t| t.scheduled_at).unwrap();
    assert_eq!(first.priority, 50);
}

#[tokio::test]
async fn test_interrupt_stops_with_tasks_outstanding() {
    let tasks = TaskFileLoader::parse_str(TASK_FILE, Path::new("e2e.toml")).unwrap();
    let mut config = fast_config(1);
    config.dry_run.retry_after = Duration::from_secs(60);

    let store = Arc::new(InMemoryTaskStore::new());
    let factory = DryRunClient::factory(config.dry_run.clone());
    let system = DispatchSystem::new(config, store.clone(), factory);
    system.submit_tasks(tasks).await.unwrap();
    system.start().await.unwrap();

    let status = system
        .run_until_drained(
            Duration::from_millis(10),
            tokio::time::sleep(Duration::from_millis(100)),
        )
        .await
        .unwrap();

    assert!(!status.running);
    // the in-flight batch was cancelled, the rest never left the store
    assert!(store.count_by_status(TaskStatus::Cancelled) >= 1);
    assert!(store.count_by_status(TaskStatus::Pending) >= 1);
    assert_eq!(store.count_by_status(TaskStatus::Running), 0);
}

#[tokio::test]
async fn test_duplicate_submission_is_rejected() {
    let tasks = TaskFileLoader::parse_str(TASK_FILE, Path::new("e2e.toml")).unwrap();
    let config = fast_config(1);
    let store = Arc::new(InMemoryTaskStore::new());
    let factory = DryRunClient::factory(config.dry_run.clone());
    let system = DispatchSystem::new(config, store.clone(), factory);

    system.submit_tasks(tasks.clone()).await.unwrap();
    assert!(system.submit_tasks(tasks).await.is_err());
    assert_eq!(store.len(), 5);
}
