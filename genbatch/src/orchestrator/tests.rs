use std::sync::Arc;

use assert_matches::assert_matches;

use super::*;
use crate::{
    store::{memory::InMemoryStore, MockStore, StoreError},
    testing::{ScriptedWorker, StaticRepository},
    worker::{MockWorkItemRepository, RepositoryError, WorkerError},
};

struct Harness {
    orchestrator: Orchestrator,
    store: InMemoryStore,
    worker: Arc<ScriptedWorker>,
}

fn item_ids(count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("item-{i}")).collect()
}

fn harness(items: usize, worker: ScriptedWorker, job: JobConfig) -> Harness {
    let store = InMemoryStore::new();
    let worker = Arc::new(worker);
    let orchestrator = Orchestrator::new(
        Arc::new(store.clone()),
        Arc::new(StaticRepository::with_ids(item_ids(items))),
        worker.clone(),
    )
    .with_config(OrchestratorConfig::new().with_job(job));
    Harness {
        orchestrator,
        store,
        worker,
    }
}

fn unthrottled() -> JobConfig {
    JobConfig::new().with_throttle_ms(0)
}

impl Harness {
    async fn create_job(&self) -> JobId {
        match self.orchestrator.create_job(CreateJob::default()).await {
            Ok(CreateJobOutcome::Created { job_id, .. }) => job_id,
            other => panic!("Expected a job to be created, got {other:?}"),
        }
    }

    async fn job(&self, job_id: JobId) -> Job {
        self.store.load_job(job_id).await.unwrap().unwrap()
    }

    async fn tasks(&self, job_id: JobId) -> Vec<Task> {
        self.store.list_tasks(job_id, None).await.unwrap()
    }

    async fn task(&self, job_id: JobId, work_item_id: &str) -> Task {
        self.tasks(job_id)
            .await
            .into_iter()
            .find(|task| task.work_item_id == work_item_id)
            .unwrap()
    }

    /// Yield to the runtime until the task satisfies `condition`, without letting paused time
    /// advance.
    async fn wait_for(&self, job_id: JobId, work_item_id: &str, condition: impl Fn(&Task) -> bool) {
        for _ in 0..1000 {
            if condition(&self.task(job_id, work_item_id).await) {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("{work_item_id} never reached the expected state");
    }

    async fn run_to_completion(&self, job_id: JobId, batch_size: u32) {
        for _ in 0..100 {
            if self
                .orchestrator
                .process_batch(job_id, Some(batch_size))
                .await
                .unwrap()
                == BatchOutcome::Completed
            {
                return;
            }
        }
        panic!("{job_id} did not complete");
    }
}

#[tokio::test]
async fn create_job_snapshots_eligible_items() {
    let harness = harness(7, ScriptedWorker::succeeding(1), unthrottled());

    let outcome = harness
        .orchestrator
        .create_job(CreateJob::default())
        .await
        .unwrap();

    let job_id = assert_matches!(
        outcome,
        CreateJobOutcome::Created { job_id, total_items: 7 } => job_id
    );
    let job = harness.job(job_id).await;
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.total_items, 7);
    assert!(job.name.starts_with("generation-"));
    let tasks = harness.tasks(job_id).await;
    assert_eq!(
        tasks.iter().map(|task| task.work_item_id.clone()).collect::<Vec<_>>(),
        item_ids(7)
    );
    assert!(tasks
        .iter()
        .all(|task| task.status == TaskStatus::Pending && task.attempt_count == 0));
}

#[tokio::test]
async fn create_job_twice_creates_two_jobs() {
    let harness = harness(2, ScriptedWorker::succeeding(1), unthrottled());

    let first = harness.create_job().await;
    let second = harness.create_job().await;

    assert_ne!(first, second);
    assert_eq!(harness.tasks(second).await.len(), 2);
}

#[tokio::test]
async fn create_job_without_eligible_items_is_nothing_to_do() {
    let harness = harness(0, ScriptedWorker::succeeding(1), unthrottled());

    let outcome = harness
        .orchestrator
        .create_job(CreateJob::default())
        .await
        .unwrap();

    assert_eq!(outcome, CreateJobOutcome::NothingToDo);
}

#[tokio::test]
async fn create_job_applies_name_filter_and_overrides() {
    let store = InMemoryStore::new();
    let orchestrator = Orchestrator::new(
        Arc::new(store.clone()),
        Arc::new(StaticRepository::with_ids(["math-1", "art-1", "math-2"])),
        Arc::new(ScriptedWorker::succeeding(1)),
    );

    let outcome = orchestrator
        .create_job(CreateJob {
            name: Some("maths".to_owned()),
            filter: Some("math".to_owned()),
            config: JobConfigOverrides {
                max_attempts: Some(5),
                ..Default::default()
            },
        })
        .await
        .unwrap();

    let job_id = assert_matches!(
        outcome,
        CreateJobOutcome::Created { job_id, total_items: 2 } => job_id
    );
    let job = store.load_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.name, "maths");
    assert_eq!(job.config.max_attempts, 5);
    assert_eq!(job.config.batch_size, JobConfig::new().batch_size);
    let tasks = store.list_tasks(job_id, None).await.unwrap();
    assert!(tasks.iter().all(|task| task.max_attempts == 5));
}

#[tokio::test]
async fn create_job_rejects_invalid_overrides() {
    let harness = harness(2, ScriptedWorker::succeeding(1), unthrottled());

    let result = harness
        .orchestrator
        .create_job(CreateJob {
            config: JobConfigOverrides {
                max_attempts: Some(0),
                ..Default::default()
            },
            ..Default::default()
        })
        .await;

    assert_matches!(result, Err(OrchestratorError::InvalidInput(_)));
}

#[tokio::test]
async fn create_job_surfaces_repository_errors() {
    let mut repository = MockWorkItemRepository::new();
    repository
        .expect_list_eligible()
        .returning(|_| Err(RepositoryError("connection refused".to_owned())));
    let orchestrator = Orchestrator::new(
        Arc::new(InMemoryStore::new()),
        Arc::new(repository),
        Arc::new(ScriptedWorker::succeeding(1)),
    );

    let result = orchestrator.create_job(CreateJob::default()).await;

    assert_matches!(result, Err(OrchestratorError::Repository(_)));
}

#[tokio::test]
async fn create_job_inserts_the_job_and_its_tasks_together() {
    let mut store = MockStore::new();
    store
        .expect_insert_job()
        .withf(|job| {
            job.total_items == 3
                && job.tasks.iter().map(|task| task.work_item_id.clone()).collect::<Vec<_>>()
                    == item_ids(3)
        })
        .times(1)
        .returning(|_| Err(StoreError::BadState));
    store.expect_load_job().returning(|_| Ok(None));
    let orchestrator = Orchestrator::new(
        Arc::new(store),
        Arc::new(StaticRepository::with_ids(item_ids(3))),
        Arc::new(ScriptedWorker::succeeding(1)),
    );

    let result = orchestrator.create_job(CreateJob::default()).await;

    assert_matches!(result, Err(OrchestratorError::Store(StoreError::BadState)));
    assert_matches!(
        orchestrator.process_batch(JobId::from(0), None).await,
        Err(OrchestratorError::JobNotFound(_))
    );
}

#[tokio::test]
async fn failed_attempt_returns_task_to_pending() {
    let worker = ScriptedWorker::succeeding(10)
        .with_script("item-3", [Err(WorkerError::new("rate limited"))]);
    let harness = harness(7, worker, unthrottled());
    let job_id = harness.create_job().await;

    let outcome = harness
        .orchestrator
        .process_batch(job_id, Some(3))
        .await
        .unwrap();

    assert_eq!(outcome.processed_count(), 3);
    let results = assert_matches!(outcome, BatchOutcome::Processed { results, .. } => results);
    assert_eq!(
        results.iter().map(|result| result.status).collect::<Vec<_>>(),
        [TaskStatus::Completed, TaskStatus::Completed, TaskStatus::Pending]
    );
    assert_eq!(results[2].error.as_deref(), Some("generation: rate limited"));

    let job = harness.job(job_id).await;
    assert_eq!(job.status, JobStatus::Running);
    assert!(job.started_at.is_some());
    assert_eq!(job.completed_items, 2);
    assert_eq!(job.failed_items, 0);

    let retried = harness.task(job_id, "item-3").await;
    assert_eq!(retried.status, TaskStatus::Pending);
    assert_eq!(retried.attempt_count, 1);
    assert_eq!(retried.error_message.as_deref(), Some("generation: rate limited"));

    let untouched = harness.store.list_tasks(job_id, Some(TaskStatus::Pending)).await.unwrap();
    assert_eq!(untouched.len(), 5);
    assert_eq!(
        untouched.iter().filter(|task| task.attempt_count == 0).count(),
        4
    );
}

#[tokio::test]
async fn task_fails_once_attempts_are_exhausted() {
    let harness = harness(
        1,
        ScriptedWorker::failing("model unavailable"),
        unthrottled().with_max_attempts(3),
    );
    let job_id = harness.create_job().await;

    for attempt in 1..=3 {
        harness
            .orchestrator
            .process_batch(job_id, None)
            .await
            .unwrap();
        let task = harness.task(job_id, "item-1").await;
        assert_eq!(task.attempt_count, attempt);
        assert_eq!(harness.job(job_id).await.failed_items, u32::from(attempt == 3));
    }

    let task = harness.task(job_id, "item-1").await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.attempt_count, task.max_attempts);
    assert_eq!(harness.worker.call_count("item-1"), 3);

    let outcome = harness.orchestrator.process_batch(job_id, None).await.unwrap();
    assert_eq!(outcome, BatchOutcome::Completed);
    let job = harness.job(job_id).await;
    assert_eq!(job.failed_items, 1);
    assert_eq!(job.completed_items, 0);
}

#[tokio::test]
async fn job_completes_once_all_tasks_are_done() {
    let harness = harness(5, ScriptedWorker::succeeding(2), unthrottled());
    let job_id = harness.create_job().await;

    let first = harness.orchestrator.process_batch(job_id, Some(3)).await.unwrap();
    let second = harness.orchestrator.process_batch(job_id, Some(2)).await.unwrap();
    let last = harness.orchestrator.process_batch(job_id, Some(3)).await.unwrap();

    assert_eq!(first.processed_count(), 3);
    assert_eq!(second.processed_count(), 2);
    assert_eq!(last, BatchOutcome::Completed);
    let job = harness.job(job_id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.completed_items, 5);
    assert!(job.completed_at.is_some());

    let report = harness.orchestrator.get_status(job_id).await.unwrap();
    assert_eq!(report.aggregate_metric, 10);
    assert_eq!(report.progress_percentage, 100);
    assert_eq!(report.tasks_by_status.completed, 5);
}

#[tokio::test]
async fn completion_happens_exactly_once() {
    let harness = harness(1, ScriptedWorker::succeeding(1), unthrottled());
    let job_id = harness.create_job().await;
    harness.run_to_completion(job_id, 10).await;
    let completed = harness.job(job_id).await;

    let outcome = harness.orchestrator.process_batch(job_id, None).await.unwrap();

    assert_eq!(outcome, BatchOutcome::Completed);
    assert_eq!(harness.job(job_id).await, completed);
}

#[tokio::test]
async fn paused_job_is_not_processed() {
    let harness = harness(3, ScriptedWorker::succeeding(1), unthrottled());
    let job_id = harness.create_job().await;
    harness.orchestrator.pause_job(job_id).await.unwrap();
    let job = harness.job(job_id).await;
    let tasks = harness.tasks(job_id).await;

    let outcome = harness.orchestrator.process_batch(job_id, None).await.unwrap();

    assert_eq!(outcome, BatchOutcome::Paused);
    assert_eq!(harness.job(job_id).await, job);
    assert_eq!(harness.tasks(job_id).await, tasks);
    assert!(harness.worker.calls().is_empty());
}

#[tokio::test]
async fn resumed_job_is_processed_again() {
    let harness = harness(3, ScriptedWorker::succeeding(1), unthrottled());
    let job_id = harness.create_job().await;
    harness.orchestrator.process_batch(job_id, Some(1)).await.unwrap();

    let paused = harness.orchestrator.pause_job(job_id).await.unwrap();
    let resumed = harness.orchestrator.resume_job(job_id).await.unwrap();

    assert_eq!(paused.status, JobStatus::Paused);
    assert_eq!(resumed.status, JobStatus::Running);
    assert_eq!(resumed.started_at, paused.started_at);
    let outcome = harness.orchestrator.process_batch(job_id, None).await.unwrap();
    assert_eq!(outcome.processed_count(), 2);
}

#[tokio::test]
async fn completed_job_cannot_be_paused_or_resumed() {
    let harness = harness(1, ScriptedWorker::succeeding(1), unthrottled());
    let job_id = harness.create_job().await;
    harness.run_to_completion(job_id, 10).await;

    let paused = harness.orchestrator.pause_job(job_id).await;
    let resumed = harness.orchestrator.resume_job(job_id).await;

    assert_matches!(
        paused,
        Err(OrchestratorError::InvalidTransition {
            from: JobStatus::Completed,
            to: JobStatus::Paused,
            ..
        })
    );
    assert_matches!(
        resumed,
        Err(OrchestratorError::InvalidTransition {
            from: JobStatus::Completed,
            to: JobStatus::Running,
            ..
        })
    );
    assert_eq!(harness.job(job_id).await.status, JobStatus::Completed);
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let harness = harness(1, ScriptedWorker::succeeding(1), unthrottled());
    let job_id = JobId::from(404);

    assert_matches!(
        harness.orchestrator.process_batch(job_id, None).await,
        Err(OrchestratorError::JobNotFound(id)) if id == job_id
    );
    assert_matches!(
        harness.orchestrator.get_status(job_id).await,
        Err(OrchestratorError::JobNotFound(_))
    );
    assert_matches!(
        harness.orchestrator.pause_job(job_id).await,
        Err(OrchestratorError::JobNotFound(_))
    );
    assert_matches!(
        harness.orchestrator.resume_job(job_id).await,
        Err(OrchestratorError::JobNotFound(_))
    );
    assert_matches!(
        harness.orchestrator.list_tasks(job_id, None).await,
        Err(OrchestratorError::JobNotFound(_))
    );
}

#[tokio::test]
async fn zero_batch_size_is_invalid_and_mutates_nothing() {
    let harness = harness(1, ScriptedWorker::succeeding(1), unthrottled());
    let job_id = harness.create_job().await;

    let result = harness.orchestrator.process_batch(job_id, Some(0)).await;

    assert_matches!(result, Err(OrchestratorError::InvalidInput(_)));
    assert_eq!(harness.job(job_id).await.status, JobStatus::Pending);
}

#[tokio::test]
async fn batch_size_defaults_to_job_config() {
    let harness = harness(5, ScriptedWorker::succeeding(1), unthrottled().with_batch_size(2));
    let job_id = harness.create_job().await;

    let outcome = harness.orchestrator.process_batch(job_id, None).await.unwrap();

    assert_eq!(outcome.processed_count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_batches_never_invoke_a_task_twice() {
    let harness = harness(
        24,
        ScriptedWorker::succeeding(1).with_delay(Duration::from_millis(2)),
        unthrottled(),
    );
    let job_id = harness.create_job().await;

    let handles = (0..4)
        .map(|_| {
            let orchestrator = harness.orchestrator.clone();
            tokio::spawn(async move {
                loop {
                    match orchestrator.process_batch(job_id, Some(3)).await.unwrap() {
                        BatchOutcome::Completed => break,
                        BatchOutcome::Waiting => tokio::task::yield_now().await,
                        _ => {}
                    }
                }
            })
        })
        .collect::<Vec<_>>();
    for result in futures::future::join_all(handles).await {
        result.unwrap();
    }

    let mut calls = harness.worker.calls();
    calls.sort();
    let mut expected = item_ids(24);
    expected.sort();
    assert_eq!(calls, expected);
    let job = harness.job(job_id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.completed_items, 24);
}

#[tokio::test(start_paused = true)]
async fn throttle_sleeps_between_worker_invocations() {
    let harness = harness(3, ScriptedWorker::succeeding(1), JobConfig::new().with_throttle_ms(1000));
    let job_id = harness.create_job().await;
    let start = tokio::time::Instant::now();

    let outcome = harness.orchestrator.process_batch(job_id, Some(3)).await.unwrap();

    assert_eq!(outcome.processed_count(), 3);
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(2), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn throttle_elapses_before_the_next_attempt_begins() {
    let harness = harness(2, ScriptedWorker::succeeding(1), JobConfig::new().with_throttle_ms(1000));
    let job_id = harness.create_job().await;

    let batch = tokio::spawn({
        let orchestrator = harness.orchestrator.clone();
        async move { orchestrator.process_batch(job_id, Some(2)).await }
    });
    harness
        .wait_for(job_id, "item-1", |task| task.status == TaskStatus::Completed)
        .await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    let throttled = harness.task(job_id, "item-2").await;
    assert_eq!(throttled.status, TaskStatus::Running);
    assert_eq!(throttled.attempt_count, 0);
    assert_eq!(harness.worker.call_count("item-2"), 0);

    let outcome = batch.await.unwrap().unwrap();
    assert_eq!(outcome.processed_count(), 2);
    assert_eq!(harness.task(job_id, "item-2").await.attempt_count, 1);
}

#[tokio::test]
async fn task_backing_off_makes_the_job_wait() {
    let worker =
        ScriptedWorker::succeeding(1).with_script("item-1", [Err(WorkerError::new("busy"))]);
    let harness = harness(
        1,
        worker,
        unthrottled().with_retry_backoff(RetryBackoff::Constant {
            delay_ms: 60_000,
            jitter_percent: None,
        }),
    );
    let job_id = harness.create_job().await;

    harness.orchestrator.process_batch(job_id, None).await.unwrap();
    let outcome = harness.orchestrator.process_batch(job_id, None).await.unwrap();

    assert_eq!(outcome, BatchOutcome::Waiting);
    let task = harness.task(job_id, "item-1").await;
    assert_eq!(task.status, TaskStatus::Pending);
    assert!(task.retry_at.is_some_and(|retry_at| retry_at > Utc::now()));
    assert_eq!(harness.worker.call_count("item-1"), 1);
}

#[tokio::test(start_paused = true)]
async fn worker_timeout_counts_as_failed_attempt() {
    let store = InMemoryStore::new();
    let orchestrator = Orchestrator::new(
        Arc::new(store.clone()),
        Arc::new(StaticRepository::with_ids(["slow"])),
        Arc::new(ScriptedWorker::succeeding(1).with_delay(Duration::from_secs(60))),
    )
    .with_config(
        OrchestratorConfig::new()
            .with_job(unthrottled().with_max_attempts(1))
            .with_worker_timeout(Duration::from_secs(1)),
    );
    let CreateJobOutcome::Created { job_id, .. } =
        orchestrator.create_job(CreateJob::default()).await.unwrap()
    else {
        panic!("Expected a job to be created");
    };

    let outcome = orchestrator.process_batch(job_id, None).await.unwrap();

    let results = assert_matches!(outcome, BatchOutcome::Processed { results, .. } => results);
    assert_eq!(results[0].status, TaskStatus::Failed);
    assert!(results[0]
        .error
        .as_deref()
        .is_some_and(|error| error.starts_with("timeout")));
    assert_eq!(store.load_job(job_id).await.unwrap().unwrap().failed_items, 1);
}

#[tokio::test]
async fn progress_never_exceeds_total_items() {
    let worker = ScriptedWorker::succeeding(3)
        .with_script("item-2", [Err(WorkerError::new("flaky"))])
        .with_script(
            "item-4",
            [Err(WorkerError::new("broken")), Err(WorkerError::new("broken"))],
        )
        .with_script("item-6", [Err(WorkerError::new("flaky")), Ok(9)]);
    let harness = harness(7, worker, unthrottled().with_max_attempts(2));
    let job_id = harness.create_job().await;
    let mut processed = 0;

    loop {
        let outcome = harness.orchestrator.process_batch(job_id, Some(2)).await.unwrap();
        let job = harness.job(job_id).await;
        assert!(job.completed_items + job.failed_items <= job.total_items);
        assert!(job.processed_items() >= processed);
        processed = job.processed_items();
        if outcome == BatchOutcome::Completed {
            break;
        }
    }

    let report = harness.orchestrator.get_status(job_id).await.unwrap();
    assert_eq!(report.job.completed_items, 6);
    assert_eq!(report.job.failed_items, 1);
    assert_eq!(report.aggregate_metric, 5 * 3 + 9);
    assert_eq!(report.progress_percentage, 86);
    for task in harness.tasks(job_id).await {
        assert!(task.attempt_count <= task.max_attempts);
    }
}

#[tokio::test]
async fn list_tasks_filters_by_status() {
    let worker = ScriptedWorker::succeeding(1).with_script("item-2", [Err(WorkerError::new("x"))]);
    let harness = harness(4, worker, unthrottled());
    let job_id = harness.create_job().await;
    harness.orchestrator.process_batch(job_id, Some(2)).await.unwrap();

    let completed = harness
        .orchestrator
        .list_tasks(job_id, Some(TaskStatus::Completed))
        .await
        .unwrap();
    let all = harness.orchestrator.list_tasks(job_id, None).await.unwrap();

    assert_eq!(
        completed.iter().map(|task| task.work_item_id.as_str()).collect::<Vec<_>>(),
        ["item-1"]
    );
    assert_eq!(all.len(), 4);
}

#[tokio::test]
async fn recover_stalled_releases_old_running_tasks() {
    let harness = harness(2, ScriptedWorker::succeeding(1), unthrottled().with_max_attempts(2));
    let job_id = harness.create_job().await;
    let store = &harness.store;
    // item-1 stalls on its first attempt and item-2 on its final one.
    let claimed = store.claim_tasks(job_id, 2, Utc::now()).await.unwrap();
    store.start_task(claimed[0].id, 0).await.unwrap().unwrap();
    let second = store.start_task(claimed[1].id, 0).await.unwrap().unwrap();
    store
        .finish_task(
            second.id,
            1,
            TaskOutcome::Retryable {
                error: "first".to_owned(),
                retry_at: None,
            },
        )
        .await
        .unwrap();
    let reclaimed = store.claim_tasks(job_id, 1, Utc::now()).await.unwrap();
    store.start_task(reclaimed[0].id, 1).await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let untouched = harness
        .orchestrator
        .recover_stalled(job_id, TimeDelta::hours(1))
        .await
        .unwrap();
    let recovered = harness
        .orchestrator
        .recover_stalled(job_id, TimeDelta::zero())
        .await
        .unwrap();

    assert_eq!(untouched, 0);
    assert_eq!(recovered, 2);
    let first = harness.task(job_id, "item-1").await;
    assert_eq!(first.status, TaskStatus::Pending);
    assert_eq!(first.error_message.as_deref(), Some(STALLED_ERROR));
    let second = harness.task(job_id, "item-2").await;
    assert_eq!(second.status, TaskStatus::Failed);
    assert_eq!(harness.job(job_id).await.failed_items, 1);

    harness.run_to_completion(job_id, 10).await;
    let job = harness.job(job_id).await;
    assert_eq!((job.completed_items, job.failed_items), (1, 1));
}

#[tokio::test(start_paused = true)]
async fn outcome_of_a_task_recovered_mid_batch_is_dropped() {
    let worker = ScriptedWorker::succeeding(7).with_delay(Duration::from_secs(10));
    let harness = harness(1, worker, unthrottled());
    let job_id = harness.create_job().await;

    let batch = tokio::spawn({
        let orchestrator = harness.orchestrator.clone();
        async move { orchestrator.process_batch(job_id, None).await }
    });
    harness
        .wait_for(job_id, "item-1", |task| task.attempt_count == 1)
        .await;
    std::thread::sleep(Duration::from_millis(2));

    let recovered = harness
        .orchestrator
        .recover_stalled(job_id, TimeDelta::zero())
        .await
        .unwrap();
    let outcome = batch.await.unwrap().unwrap();

    assert_eq!(recovered, 1);
    assert_eq!(
        outcome,
        BatchOutcome::Processed {
            job_id,
            results: vec![]
        }
    );
    let job = harness.job(job_id).await;
    assert_eq!((job.completed_items, job.failed_items), (0, 0));
    let task = harness.task(job_id, "item-1").await;
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.error_message.as_deref(), Some(STALLED_ERROR));

    harness.run_to_completion(job_id, 1).await;

    let job = harness.job(job_id).await;
    assert_eq!((job.completed_items, job.failed_items), (1, 0));
    let task = harness.task(job_id, "item-1").await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.attempt_count, 2);
    assert_eq!(harness.worker.call_count("item-1"), 2);
    let report = harness.orchestrator.get_status(job_id).await.unwrap();
    assert_eq!(report.aggregate_metric, 7);
}

#[tokio::test]
async fn recover_stalled_rejects_negative_age() {
    let harness = harness(1, ScriptedWorker::succeeding(1), unthrottled());
    let job_id = harness.create_job().await;

    let result = harness
        .orchestrator
        .recover_stalled(job_id, TimeDelta::seconds(-1))
        .await;

    assert_matches!(result, Err(OrchestratorError::InvalidInput(_)));
}
