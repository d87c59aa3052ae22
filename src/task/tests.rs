#[cfg(test)]
mod tests {
    use crate::task::provider::*;
    use crate::task::scheduler::*;
    use crate::task::settings::*;
    use crate::task::store::*;
    use crate::task::types::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use tokio::sync::Mutex;

    static EXPRESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn usa_settings() -> SimulationSettings {
        SimulationSettings::new(
            InstrumentType::Equity,
            Region::Usa,
            Universe::Top3000,
            Delay::One,
        )
    }

    // Three settings that land in three distinct groups
    fn group_settings(group: u8) -> SimulationSettings {
        match group {
            1 => usa_settings(),
            2 => SimulationSettings::new(
                InstrumentType::Equity,
                Region::Usa,
                Universe::Top1000,
                Delay::Zero,
            ),
            _ => SimulationSettings::new(
                InstrumentType::Equity,
                Region::Eur,
                Universe::Top2500,
                Delay::One,
            ),
        }
    }

    fn create_test_task(id: TaskId, group: u8, priority: i32) -> SimulationTask {
        let n = EXPRESSION_COUNTER.fetch_add(1, Ordering::SeqCst);
        let mut task = SimulationTask::new(
            format!("rank(close) * {}", n),
            group_settings(group),
            priority,
        )
        .unwrap();
        task.id = id;
        task
    }

    fn group_key(group: u8) -> String {
        group_settings(group).settings_group_key()
    }

    /// Provider that hands out its tasks once and records acknowledgements
    struct OneShotProvider {
        tasks: Mutex<Vec<SimulationTask>>,
        served: AtomicBool,
        acknowledged: Mutex<Vec<TaskId>>,
    }

    impl OneShotProvider {
        fn new(tasks: Vec<SimulationTask>) -> Self {
            Self {
                tasks: Mutex::new(tasks),
                served: AtomicBool::new(false),
                acknowledged: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl TaskProvider for OneShotProvider {
        async fn fetch_tasks(
            &self,
            count: usize,
            _priority: Option<i32>,
        ) -> Result<Vec<SimulationTask>, StoreError> {
            if self.served.swap(true, Ordering::SeqCst) {
                return Ok(Vec::new());
            }
            let mut tasks = self.tasks.lock().await;
            let take = count.min(tasks.len());
            Ok(tasks.drain(..take).collect())
        }

        async fn acknowledge_scheduled_tasks(
            &self,
            task_ids: &[TaskId],
        ) -> Result<(), StoreError> {
            self.acknowledged.lock().await.extend_from_slice(task_ids);
            Ok(())
        }
    }

    #[test]
    fn test_settings_group_key_uses_four_fields() {
        let settings = usa_settings();
        assert_eq!(settings.settings_group_key(), "USA_1_FASTEXPR_EQUITY");

        // Universe and neutralization do not affect grouping
        let other = SimulationSettings::new(
            InstrumentType::Equity,
            Region::Usa,
            Universe::Top500,
            Delay::One,
        )
        .with_neutralization(Neutralization::Sector)
        .with_decay(4);
        assert_eq!(other.settings_group_key(), settings.settings_group_key());

        let python = usa_settings().with_language(Language::Python);
        assert_eq!(python.settings_group_key(), "USA_1_PYTHON_EQUITY");
    }

    #[test]
    fn test_task_signature_is_stable() {
        let a = task_signature("rank(close)", &usa_settings());
        let b = task_signature("rank(close)", &usa_settings());
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let different_expr = task_signature("rank(open)", &usa_settings());
        let different_settings = task_signature("rank(close)", &usa_settings().with_decay(3));
        assert_ne!(a, different_expr);
        assert_ne!(a, different_settings);
    }

    #[test]
    fn test_settings_validation() {
        assert!(usa_settings().validate().is_ok());

        let crypto_usa = SimulationSettings::new(
            InstrumentType::Crypto,
            Region::Usa,
            Universe::Top50,
            Delay::One,
        );
        assert!(matches!(
            crypto_usa.validate(),
            Err(SettingsError::UnsupportedRegion { .. })
        ));

        let wrong_universe = SimulationSettings::new(
            InstrumentType::Equity,
            Region::Chn,
            Universe::Top3000,
            Delay::One,
        );
        assert!(matches!(
            wrong_universe.validate(),
            Err(SettingsError::UnsupportedUniverse { .. })
        ));

        let japan_delay_zero = SimulationSettings::new(
            InstrumentType::Equity,
            Region::Jpn,
            Universe::Top1600,
            Delay::Zero,
        );
        assert!(matches!(
            japan_delay_zero.validate(),
            Err(SettingsError::UnsupportedDelay { .. })
        ));

        let china_country = SimulationSettings::new(
            InstrumentType::Equity,
            Region::Chn,
            Universe::Top2000U,
            Delay::One,
        )
        .with_neutralization(Neutralization::Country);
        assert!(matches!(
            china_country.validate(),
            Err(SettingsError::UnsupportedNeutralization { .. })
        ));

        let crypto_sector = SimulationSettings::new(
            InstrumentType::Crypto,
            Region::Glb,
            Universe::Top20,
            Delay::One,
        )
        .with_neutralization(Neutralization::Sector);
        assert!(crypto_sector.validate().is_err());

        assert_eq!(
            usa_settings().with_decay(MAX_DECAY + 1).validate(),
            Err(SettingsError::DecayOutOfRange {
                value: MAX_DECAY + 1,
                max: MAX_DECAY
            })
        );
        assert!(matches!(
            usa_settings().with_truncation(1.5).validate(),
            Err(SettingsError::TruncationOutOfRange(_))
        ));
    }

    #[test]
    fn test_task_creation_rejects_invalid_settings() {
        let invalid = usa_settings().with_truncation(-0.1);
        assert!(SimulationTask::new("rank(close)", invalid, 0).is_err());
    }

    #[test]
    fn test_settings_serde_wire_names() {
        let settings = usa_settings().with_neutralization(Neutralization::SlowAndFast);
        let json = serde_json::to_value(&settings).unwrap();

        assert_eq!(json["region"], "USA");
        assert_eq!(json["delay"], 1);
        assert_eq!(json["language"], "FASTEXPR");
        assert_eq!(json["instrument_type"], "EQUITY");
        assert_eq!(json["neutralization"], "SLOW_AND_FAST");

        let mut bad_delay = json.clone();
        bad_delay["delay"] = serde_json::json!(2);
        assert!(serde_json::from_value::<SimulationSettings>(bad_delay).is_err());

        let parsed: SimulationSettings = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, settings);
    }

    #[test]
    fn test_status_transitions_are_monotonic() {
        let mut task = create_test_task(1, 1, 0);
        assert_eq!(task.status, TaskStatus::Pending);

        task.transition_to(TaskStatus::Scheduled).unwrap();
        assert!(task.scheduled_at.is_some());

        task.transition_to(TaskStatus::Running).unwrap();
        assert!(task.transition_to(TaskStatus::Pending).is_err());
        assert!(task.transition_to(TaskStatus::Scheduled).is_err());

        task.transition_to(TaskStatus::Error).unwrap();
        assert!(task.is_terminal());
        assert!(task.completed_at.is_some());

        let err = task.transition_to(TaskStatus::Complete).unwrap_err();
        assert_eq!(err.from, TaskStatus::Error);
        assert_eq!(err.to, TaskStatus::Complete);
    }

    #[test]
    fn test_running_may_skip_scheduled() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Cancelled));
        assert!(!TaskStatus::Cancelled.can_transition_to(TaskStatus::Cancelled));
    }

    #[tokio::test]
    async fn test_store_rejects_duplicate_signatures() {
        let store = InMemoryTaskStore::new();
        let first = store
            .create_task(SimulationTask::new("rank(close)", usa_settings(), 0).unwrap())
            .await
            .unwrap();
        assert_eq!(first.id, 1);

        let duplicate = SimulationTask::new("rank(close)", usa_settings(), 5).unwrap();
        assert!(matches!(
            store.create_task(duplicate).await,
            Err(StoreError::DuplicateSignature(_))
        ));

        // Batch with one duplicate writes nothing
        let batch = vec![
            SimulationTask::new("rank(open)", usa_settings(), 0).unwrap(),
            SimulationTask::new("rank(close)", usa_settings(), 0).unwrap(),
        ];
        assert!(store.create_tasks(batch).await.is_err());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_store_filters_and_status_updates() {
        let store = InMemoryTaskStore::new();
        let created = store
            .create_tasks(vec![
                create_test_task(0, 1, 1),
                create_test_task(0, 2, 2),
                create_test_task(0, 3, 2),
            ])
            .await
            .unwrap();
        let ids: Vec<TaskId> = created.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        let priority_two = store
            .find_tasks(&TaskFilter::pending().with_priority(Some(2)))
            .await
            .unwrap();
        assert_eq!(priority_two.len(), 2);

        store.update_status(2, TaskStatus::Running).await.unwrap();
        assert!(store.update_status(2, TaskStatus::Pending).await.is_err());

        let pending = store
            .find_tasks(&TaskFilter::pending().excluding(vec![1]))
            .await
            .unwrap();
        assert_eq!(pending.iter().map(|t| t.id).collect::<Vec<_>>(), vec![3]);
        assert_eq!(store.count_by_status(TaskStatus::Running), 1);
        assert!(matches!(
            store.get_task(99).await,
            Err(StoreError::NotFound(99))
        ));
    }

    #[tokio::test]
    async fn test_provider_fetches_and_acknowledges() {
        let store = Arc::new(InMemoryTaskStore::new());
        for i in 0..5 {
            store.create_task(create_test_task(0, 1, i)).await.unwrap();
        }

        let provider = StoreTaskProvider::new(store.clone());
        let first = provider.fetch_tasks(2, None).await.unwrap();
        assert_eq!(first.iter().map(|t| t.id).collect::<Vec<_>>(), vec![1, 2]);

        provider.acknowledge_scheduled_tasks(&[1, 2]).await.unwrap();
        let scheduled = store.get_task(1).await.unwrap();
        assert_eq!(scheduled.status, TaskStatus::Scheduled);
        assert!(scheduled.scheduled_at.is_some());

        let second = provider.fetch_tasks(10, None).await.unwrap();
        assert_eq!(second.iter().map(|t| t.id).collect::<Vec<_>>(), vec![3, 4, 5]);

        let by_priority = provider.fetch_tasks(10, Some(4)).await.unwrap();
        assert_eq!(by_priority.len(), 1);
        assert_eq!(by_priority[0].id, 5);
    }

    #[tokio::test]
    async fn test_provider_sampling_spreads_and_wraps() {
        let store = Arc::new(InMemoryTaskStore::new());
        for i in 0..6 {
            store.create_task(create_test_task(0, 1, i)).await.unwrap();
        }

        let provider = StoreTaskProvider::new(store.clone()).with_sample_interval(2);
        let first = provider.fetch_tasks(2, None).await.unwrap();
        assert_eq!(first.iter().map(|t| t.id).collect::<Vec<_>>(), vec![1, 3]);
        provider.acknowledge_scheduled_tasks(&[1, 3]).await.unwrap();

        // Pending is now [2, 4, 5, 6]; the cursor sits past the two skipped rows
        let second = provider.fetch_tasks(2, None).await.unwrap();
        assert_eq!(second.iter().map(|t| t.id).collect::<Vec<_>>(), vec![5]);
        provider.acknowledge_scheduled_tasks(&[5]).await.unwrap();

        // Cursor runs off the end and wraps back to the start
        let third = provider.fetch_tasks(2, None).await.unwrap();
        assert!(!third.is_empty());
        assert!(third.iter().all(|t| t.id == 2 || t.id == 4 || t.id == 6));
    }

    #[tokio::test]
    async fn test_has_tasks_without_provider_is_false() {
        let mut scheduler = PriorityScheduler::new(SchedulerConfig::default());
        assert!(!scheduler.has_tasks().await);

        let err = scheduler.schedule(1).await.unwrap_err();
        assert!(matches!(err, SchedulerError::NoTasksAvailable));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_empty_input_and_zero_batch() {
        let mut scheduler = PriorityScheduler::new(SchedulerConfig::default());
        scheduler.add_tasks(Vec::new());
        assert!(scheduler.is_empty());

        scheduler.add_tasks(vec![create_test_task(1, 1, 0)]);
        assert!(matches!(
            scheduler.schedule(0).await,
            Err(SchedulerError::InvalidBatchSize)
        ));
        assert_eq!(scheduler.len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_from_provider_fills_empty_scheduler() {
        let provider = Arc::new(OneShotProvider::new(vec![create_test_task(7, 1, 3)]));
        let mut scheduler =
            PriorityScheduler::new(SchedulerConfig::default()).with_provider(provider.clone());

        assert!(scheduler.is_empty());
        assert_eq!(scheduler.fetch_tasks_from_provider().await.unwrap(), 1);
        assert!(scheduler.has_tasks().await);

        let batch = scheduler.schedule(1).await.unwrap();
        assert_eq!(batch[0].id, 7);
        assert_eq!(batch[0].status, TaskStatus::Scheduled);
        assert_eq!(*provider.acknowledged.lock().await, vec![7]);

        // Provider is spent, so the scheduler reports exhaustion
        assert!(!scheduler.has_tasks().await);
    }

    #[tokio::test]
    async fn test_schedule_refills_on_demand() {
        let provider = Arc::new(OneShotProvider::new(vec![
            create_test_task(1, 1, 1),
            create_test_task(2, 1, 9),
        ]));
        let mut scheduler =
            PriorityScheduler::new(SchedulerConfig::default()).with_provider(provider);

        let batch = scheduler.schedule(5).await.unwrap();
        assert_eq!(batch.iter().map(|t| t.id).collect::<Vec<_>>(), vec![2, 1]);
    }

    #[tokio::test]
    async fn test_single_task_batches_follow_global_priority() {
        let mut scheduler = PriorityScheduler::new(SchedulerConfig::default());
        scheduler.add_tasks(vec![
            create_test_task(1, 1, 5),
            create_test_task(2, 2, 50),
            create_test_task(3, 3, 20),
            create_test_task(4, 1, 5),
        ]);

        let mut order = Vec::new();
        while scheduler.has_tasks().await {
            let batch = scheduler.schedule(1).await.unwrap();
            assert_eq!(batch.len(), 1);
            order.push(batch[0].id);
        }

        // Equal priorities keep insertion order
        assert_eq!(order, vec![2, 3, 1, 4]);
    }

    #[tokio::test]
    async fn test_batches_are_homogeneous_and_sorted() {
        let mut scheduler = PriorityScheduler::new(SchedulerConfig {
            low_priority_threshold: 100,
            ..Default::default()
        });
        let priorities = [7, 3, 12, 1, 9, 4, 15, 2, 8, 11, 6, 5];
        let tasks = priorities
            .iter()
            .enumerate()
            .map(|(i, &p)| create_test_task(i as TaskId + 1, (i % 3) as u8 + 1, p))
            .collect();
        scheduler.add_tasks(tasks);

        while scheduler.has_tasks().await {
            let remaining_max = scheduler.peek_priority().unwrap();
            let batch = scheduler.schedule(3).await.unwrap();

            assert!(!batch.is_empty() && batch.len() <= 3);
            assert!(
                batch
                    .iter()
                    .all(|t| t.settings_group_key == batch[0].settings_group_key)
            );
            assert!(batch.windows(2).all(|w| w[0].priority >= w[1].priority));
            assert_eq!(batch[0].priority, remaining_max);
            assert!(
                scheduler
                    .queued_priorities()
                    .iter()
                    .all(|&p| p <= batch[0].priority)
            );
        }
    }

    #[tokio::test]
    async fn test_drained_group_leaves_no_index_entry() {
        let mut scheduler = PriorityScheduler::new(SchedulerConfig::default());
        scheduler.add_tasks(vec![
            create_test_task(1, 1, 10),
            create_test_task(2, 1, 10),
            create_test_task(3, 2, 1),
        ]);
        assert_eq!(scheduler.group_count(), 2);

        let batch = scheduler.schedule(5).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(scheduler.group_count(), 1);
        assert_eq!(scheduler.group_len(&group_key(1)), 0);

        scheduler.schedule(5).await.unwrap();
        assert_eq!(scheduler.group_count(), 0);
        assert!(scheduler.is_empty());
    }

    #[tokio::test]
    async fn test_end_to_end_group_batches() {
        let mut scheduler = PriorityScheduler::new(SchedulerConfig::default());
        scheduler.add_tasks(vec![
            create_test_task(1, 1, 10),
            create_test_task(2, 1, 20),
            create_test_task(3, 2, 30),
            create_test_task(4, 2, 40),
            create_test_task(5, 3, 50),
        ]);

        let mut tops = Vec::new();
        let mut batches = Vec::new();
        while scheduler.has_tasks().await {
            let batch = scheduler.schedule(3).await.unwrap();
            assert!(batch.len() <= 3);
            assert!(
                batch
                    .iter()
                    .all(|t| t.settings_group_key == batch[0].settings_group_key)
            );
            tops.push(batch[0].priority);
            batches.push(batch.iter().map(|t| t.id).collect::<Vec<_>>());
        }

        assert!(tops.windows(2).all(|w| w[0] > w[1]));
        assert_eq!(batches, vec![vec![5], vec![4, 3], vec![2, 1]]);
    }

    #[tokio::test]
    async fn test_promotion_after_threshold() {
        let mut scheduler = PriorityScheduler::new(SchedulerConfig {
            low_priority_threshold: 2,
            ..Default::default()
        });
        scheduler.add_tasks((1..=6).map(|id| create_test_task(id, 1, 5)).collect());

        scheduler.schedule(2).await.unwrap();
        assert_eq!(scheduler.skip_count(&group_key(1)), 1);
        scheduler.schedule(2).await.unwrap();
        assert_eq!(scheduler.skip_count(&group_key(1)), 2);
        assert_eq!(scheduler.group_priorities(&group_key(1)), vec![5, 5]);

        // A higher priority task in another group takes this cycle; the promotion pass still runs
        scheduler.add_tasks(vec![create_test_task(10, 2, 100)]);
        let batch = scheduler.schedule(1).await.unwrap();
        assert_eq!(batch[0].id, 10);

        assert_eq!(scheduler.group_priorities(&group_key(1)), vec![6, 6]);
        assert_eq!(scheduler.skip_count(&group_key(1)), 0);

        // Counter starts over, so the next pass leaves priorities alone
        scheduler.add_tasks(vec![create_test_task(11, 2, 100)]);
        scheduler.schedule(1).await.unwrap();
        assert_eq!(scheduler.group_priorities(&group_key(1)), vec![6, 6]);
    }

    #[tokio::test]
    async fn test_promoted_task_contends_globally_in_same_cycle() {
        let mut scheduler = PriorityScheduler::new(SchedulerConfig {
            low_priority_threshold: 1,
            ..Default::default()
        });
        scheduler.add_tasks(vec![
            create_test_task(1, 1, 5),
            create_test_task(2, 1, 5),
            create_test_task(3, 1, 5),
        ]);
        scheduler.schedule(2).await.unwrap();
        assert_eq!(scheduler.skip_count(&group_key(1)), 1);

        // Without a global re-sort task 4 would lead at priority 6
        scheduler.add_tasks(vec![create_test_task(4, 2, 6)]);
        let batch = scheduler.schedule(1).await.unwrap();

        assert_eq!(batch[0].id, 3);
        assert_eq!(batch[0].priority, 6);
        assert_eq!(scheduler.peek_priority(), Some(6));
    }

    #[tokio::test]
    async fn test_non_pending_task_is_rejected() {
        let mut scheduler = PriorityScheduler::new(SchedulerConfig::default());
        let mut running = create_test_task(1, 1, 1);
        running.status = TaskStatus::Running;
        scheduler.add_tasks(vec![running]);

        let err = scheduler.schedule(1).await.unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::InvalidStatus {
                task_id: 1,
                status: TaskStatus::Running
            }
        ));
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn test_scheduler_over_store_provider() {
        let store = Arc::new(InMemoryTaskStore::new());
        store
            .create_tasks(vec![
                create_test_task(0, 1, 1),
                create_test_task(0, 1, 2),
                create_test_task(0, 2, 3),
            ])
            .await
            .unwrap();

        let provider = Arc::new(StoreTaskProvider::new(store.clone()));
        let shared = PriorityScheduler::new(SchedulerConfig::default())
            .with_provider(provider)
            .into_shared();

        let batch = shared.lock().await.schedule(2).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].priority, 3);
        assert_eq!(
            store.get_task(batch[0].id).await.unwrap().status,
            TaskStatus::Scheduled
        );
        assert_eq!(store.count_by_status(TaskStatus::Pending), 2);
    }
}
