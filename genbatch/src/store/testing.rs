//! Test suite for ensuring a correct implementation of a [`Store`].
use std::collections::HashSet;

use chrono::{TimeDelta, Utc};

use super::*;
use crate::{job::JobConfig, task::NewTask};

/// Create the conformance test suite for a [`Store`] implementation.
///
/// For store implementors, it is useful to include this as part of your test suites.
///
/// # Example
///
/// ```
/// use genbatch::store_test_suite;
/// use genbatch::store::memory::InMemoryStore;
/// store_test_suite!(for: InMemoryStore::new());
/// ```
///
/// If you are using a different async test attribute you can configure the macro to use that
/// instead, and optionally mark the tests as ignored. For example with `sqlx::test`:
///
/// ```ignore
/// use genbatch::store_test_suite;
/// store_test_suite!(
///     attr: sqlx::test,
///     args: (pool: PgPool),
///     store: StoreImplementation::from(pool),
///     ignore: "requires a database"
/// );
/// ```
#[macro_export]
macro_rules! store_test_suite {
    (for: $store:expr) => {
        $crate::store_test_suite!(attr: tokio::test, args: (), store: $store);
    };
    (attr: $attr:meta, args: $args:tt, store: $store:expr, ignore: $reason:literal) => {
        $crate::store_test_suite!(@suite [$attr] $args ($store) ignore $reason);
    };
    (attr: $attr:meta, args: $args:tt, store: $store:expr) => {
        $crate::store_test_suite!(@suite [$attr] $args ($store));
    };
    (@suite [$attr:meta] $args:tt ($store:expr) $($ignore:tt)*) => {
        $crate::store_test_suite!(@tests [$attr] $args ($store) $($ignore)*;
            insert_job_is_pending,
            insert_job_lists_tasks_in_creation_order,
            insert_job_keeps_tasks_of_jobs_apart,
            load_job_not_found,
            transition_job_first_call_wins,
            transition_job_keeps_started_at,
            transition_job_to_completed_stamps_completed_at,
            transition_job_unknown_job,
            increment_job_counters,
            increment_job_counters_not_found,
            claim_tasks_in_fifo_order_up_to_limit,
            claim_tasks_skips_unclaimable_tasks,
            claim_tasks_only_claims_for_job,
            claim_tasks_concurrently_never_claims_twice,
            start_task_increments_attempt,
            start_task_requires_expected_attempt,
            finish_task_records_outcomes,
            finish_task_requires_running_at_expected_attempt,
            count_active_tasks,
            list_tasks_by_status,
        );
    };
    (@tests [$attr:meta] $args:tt ($store:expr) ignore $reason:literal; $($name:ident,)*) => {
        $(
            #[$attr]
            #[ignore = $reason]
            async fn $name $args {
                let store = $store;
                $crate::store::testing::$name(store).await;
            }
        )*
    };
    (@tests [$attr:meta] $args:tt ($store:expr); $($name:ident,)*) => {
        $(
            #[$attr]
            async fn $name $args {
                let store = $store;
                $crate::store::testing::$name(store).await;
            }
        )*
    };
}

pub use store_test_suite;

fn new_job(tasks: usize, max_attempts: u32) -> NewJob {
    NewJob {
        name: "job".to_owned(),
        total_items: tasks as u32,
        config: JobConfig::new().with_max_attempts(max_attempts),
        tasks: (0..tasks)
            .map(|i| NewTask {
                work_item_id: format!("item-{i}"),
                payload: serde_json::json!({ "position": i }),
                max_attempts,
            })
            .collect(),
    }
}

async fn job_with_tasks(store: &impl Store, tasks: usize, max_attempts: u32) -> Job {
    store.insert_job(new_job(tasks, max_attempts)).await.unwrap()
}

async fn claimed_task(store: &impl Store, job: &Job) -> Task {
    store
        .claim_tasks(job.id, 1, Utc::now())
        .await
        .unwrap()
        .pop()
        .expect("A task should be claimable")
}

fn work_item_ids(tasks: &[Task]) -> Vec<&str> {
    tasks.iter().map(|task| task.work_item_id.as_str()).collect()
}

pub async fn insert_job_is_pending(store: impl Store) {
    let job = job_with_tasks(&store, 3, 2).await;

    let loaded = store.load_job(job.id).await.unwrap().unwrap();

    assert_eq!(loaded.status, JobStatus::Pending);
    assert_eq!(loaded.total_items, 3);
    assert_eq!(loaded.completed_items, 0);
    assert_eq!(loaded.failed_items, 0);
    assert_eq!(loaded.config.max_attempts, 2);
    assert!(loaded.started_at.is_none());
    assert!(loaded.completed_at.is_none());
}

pub async fn insert_job_lists_tasks_in_creation_order(store: impl Store) {
    let job = job_with_tasks(&store, 4, 3).await;

    let tasks = store.list_tasks(job.id, None).await.unwrap();

    assert_eq!(
        work_item_ids(&tasks),
        vec!["item-0", "item-1", "item-2", "item-3"]
    );
    assert!(tasks.iter().all(|task| task.status == TaskStatus::Pending
        && task.attempt_count == 0
        && task.max_attempts == 3
        && task.job_id == job.id));
    assert_eq!(tasks[2].payload, serde_json::json!({ "position": 2 }));
}

pub async fn insert_job_keeps_tasks_of_jobs_apart(store: impl Store) {
    let first = job_with_tasks(&store, 2, 3).await;
    let empty = job_with_tasks(&store, 0, 3).await;
    let second = job_with_tasks(&store, 3, 3).await;

    assert_ne!(first.id, second.id);
    assert_eq!(store.list_tasks(first.id, None).await.unwrap().len(), 2);
    assert!(store.list_tasks(empty.id, None).await.unwrap().is_empty());
    assert_eq!(store.count_active_tasks(empty.id).await.unwrap(), 0);
    let tasks = store.list_tasks(second.id, None).await.unwrap();
    assert_eq!(work_item_ids(&tasks), vec!["item-0", "item-1", "item-2"]);
    assert!(tasks.iter().all(|task| task.job_id == second.id));
}

pub async fn load_job_not_found(store: impl Store) {
    assert!(store.load_job(JobId::from(4242)).await.unwrap().is_none());
}

pub async fn transition_job_first_call_wins(store: impl Store) {
    let job = job_with_tasks(&store, 1, 1).await;

    let first = store
        .transition_job(job.id, &[JobStatus::Pending], JobStatus::Running)
        .await
        .unwrap();
    let second = store
        .transition_job(job.id, &[JobStatus::Pending], JobStatus::Running)
        .await
        .unwrap();

    let first = first.expect("First transition should apply");
    assert_eq!(first.status, JobStatus::Running);
    assert!(first.started_at.is_some());
    assert!(second.is_none());
}

pub async fn transition_job_keeps_started_at(store: impl Store) {
    let job = job_with_tasks(&store, 1, 1).await;
    let started = store
        .transition_job(job.id, &[JobStatus::Pending], JobStatus::Running)
        .await
        .unwrap()
        .unwrap();

    store
        .transition_job(job.id, &[JobStatus::Running], JobStatus::Paused)
        .await
        .unwrap()
        .unwrap();
    let resumed = store
        .transition_job(job.id, &[JobStatus::Paused], JobStatus::Running)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(resumed.started_at, started.started_at);
}

pub async fn transition_job_to_completed_stamps_completed_at(store: impl Store) {
    let job = job_with_tasks(&store, 1, 1).await;
    store
        .transition_job(job.id, &[JobStatus::Pending], JobStatus::Running)
        .await
        .unwrap();

    let completed = store
        .transition_job(job.id, &[JobStatus::Running], JobStatus::Completed)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(completed.status, JobStatus::Completed);
    assert!(completed.completed_at.is_some());
    assert_eq!(
        store.load_job(job.id).await.unwrap().unwrap().completed_at,
        completed.completed_at
    );
}

pub async fn transition_job_unknown_job(store: impl Store) {
    let result = store
        .transition_job(JobId::from(4242), &[JobStatus::Pending], JobStatus::Running)
        .await
        .unwrap();

    assert!(result.is_none());
}

pub async fn increment_job_counters(store: impl Store) {
    let job = job_with_tasks(&store, 5, 1).await;

    store
        .increment_job_counters(job.id, CounterDelta::COMPLETED)
        .await
        .unwrap();
    store
        .increment_job_counters(job.id, CounterDelta::COMPLETED)
        .await
        .unwrap();
    store
        .increment_job_counters(job.id, CounterDelta::FAILED)
        .await
        .unwrap();

    let job = store.load_job(job.id).await.unwrap().unwrap();
    assert_eq!(job.completed_items, 2);
    assert_eq!(job.failed_items, 1);
}

pub async fn increment_job_counters_not_found(store: impl Store) {
    let result = store
        .increment_job_counters(JobId::from(4242), CounterDelta::COMPLETED)
        .await;

    assert!(matches!(result, Err(StoreError::JobNotFound(_))));
}

pub async fn claim_tasks_in_fifo_order_up_to_limit(store: impl Store) {
    let job = job_with_tasks(&store, 5, 3).await;

    let first = store.claim_tasks(job.id, 3, Utc::now()).await.unwrap();
    let second = store.claim_tasks(job.id, 3, Utc::now()).await.unwrap();
    let third = store.claim_tasks(job.id, 3, Utc::now()).await.unwrap();

    assert_eq!(work_item_ids(&first), vec!["item-0", "item-1", "item-2"]);
    assert_eq!(work_item_ids(&second), vec!["item-3", "item-4"]);
    assert!(third.is_empty());
    assert!(first
        .iter()
        .chain(second.iter())
        .all(|task| task.status == TaskStatus::Running
            && task.started_at.is_some()
            && task.attempt_count == 0));
}

pub async fn claim_tasks_skips_unclaimable_tasks(store: impl Store) {
    let job = job_with_tasks(&store, 3, 1).await;

    // item-0 exhausts its single attempt and returns to pending
    let task = claimed_task(&store, &job).await;
    store.start_task(task.id, 0).await.unwrap().unwrap();
    store
        .finish_task(
            task.id,
            1,
            TaskOutcome::Retryable {
                error: "error".to_owned(),
                retry_at: None,
            },
        )
        .await
        .unwrap();
    // item-1 is backing off
    let task = claimed_task(&store, &job).await;
    store.start_task(task.id, 0).await.unwrap().unwrap();
    store
        .finish_task(
            task.id,
            1,
            TaskOutcome::Retryable {
                error: "error".to_owned(),
                retry_at: Some(Utc::now() + TimeDelta::hours(1)),
            },
        )
        .await
        .unwrap();

    let claimed = store.claim_tasks(job.id, 10, Utc::now()).await.unwrap();

    assert_eq!(work_item_ids(&claimed), vec!["item-2"]);
}

pub async fn claim_tasks_only_claims_for_job(store: impl Store) {
    let job = job_with_tasks(&store, 2, 1).await;
    let other = job_with_tasks(&store, 2, 1).await;

    let claimed = store.claim_tasks(job.id, 10, Utc::now()).await.unwrap();

    assert_eq!(claimed.len(), 2);
    assert!(claimed.iter().all(|task| task.job_id == job.id));
    assert_eq!(store.count_active_tasks(other.id).await.unwrap(), 2);
    assert!(store
        .list_tasks(other.id, None)
        .await
        .unwrap()
        .iter()
        .all(|task| task.status == TaskStatus::Pending));
}

pub async fn claim_tasks_concurrently_never_claims_twice(store: impl Store) {
    let job = job_with_tasks(&store, 20, 1).await;
    let now = Utc::now();

    let (a, b, c, d) = tokio::join!(
        store.claim_tasks(job.id, 6, now),
        store.claim_tasks(job.id, 6, now),
        store.claim_tasks(job.id, 6, now),
        store.claim_tasks(job.id, 6, now),
    );

    let claimed: Vec<_> = [a, b, c, d]
        .into_iter()
        .flat_map(Result::unwrap)
        .map(|task| task.id)
        .collect();
    let unique: HashSet<_> = claimed.iter().collect();
    assert_eq!(claimed.len(), 20);
    assert_eq!(unique.len(), 20);
}

pub async fn start_task_increments_attempt(store: impl Store) {
    let job = job_with_tasks(&store, 1, 3).await;
    let task = claimed_task(&store, &job).await;

    let started = store.start_task(task.id, 0).await.unwrap().unwrap();

    assert_eq!(started.attempt_count, 1);
    assert_eq!(started.status, TaskStatus::Running);
    assert!(started.started_at.is_some());
}

pub async fn start_task_requires_expected_attempt(store: impl Store) {
    let job = job_with_tasks(&store, 2, 3).await;
    let task = claimed_task(&store, &job).await;
    let pending = store
        .list_tasks(job.id, Some(TaskStatus::Pending))
        .await
        .unwrap()
        .pop()
        .unwrap();

    assert!(store.start_task(task.id, 1).await.unwrap().is_none());
    assert!(store.start_task(pending.id, 0).await.unwrap().is_none());
    assert!(store.start_task(task.id, 0).await.unwrap().is_some());
    assert!(store.start_task(task.id, 0).await.unwrap().is_none());
}

pub async fn finish_task_records_outcomes(store: impl Store) {
    let job = job_with_tasks(&store, 3, 1).await;
    let tasks = store.claim_tasks(job.id, 3, Utc::now()).await.unwrap();
    for task in &tasks {
        store.start_task(task.id, 0).await.unwrap().unwrap();
    }
    let retry_at = Utc::now() + TimeDelta::minutes(5);

    assert!(store
        .finish_task(tasks[0].id, 1, TaskOutcome::Completed { metric: 12 })
        .await
        .unwrap());
    assert!(store
        .finish_task(
            tasks[1].id,
            1,
            TaskOutcome::Retryable {
                error: "try again".to_owned(),
                retry_at: Some(retry_at),
            },
        )
        .await
        .unwrap());
    assert!(store
        .finish_task(
            tasks[2].id,
            1,
            TaskOutcome::Failed {
                error: "broken".to_owned(),
            },
        )
        .await
        .unwrap());

    let tasks = store.list_tasks(job.id, None).await.unwrap();
    assert_eq!(tasks[0].status, TaskStatus::Completed);
    assert_eq!(tasks[0].result_metric, Some(12));
    assert!(tasks[0].completed_at.is_some());
    assert_eq!(tasks[1].status, TaskStatus::Pending);
    assert_eq!(tasks[1].error_message.as_deref(), Some("try again"));
    let stored_retry_at = tasks[1].retry_at.expect("retry_at should be stored");
    assert!((stored_retry_at - retry_at).num_milliseconds().abs() < 1);
    assert!(tasks[1].completed_at.is_none());
    assert_eq!(tasks[2].status, TaskStatus::Failed);
    assert_eq!(tasks[2].error_message.as_deref(), Some("broken"));
    assert!(tasks[2].completed_at.is_some());
}

pub async fn finish_task_requires_running_at_expected_attempt(store: impl Store) {
    let job = job_with_tasks(&store, 1, 3).await;
    let task = claimed_task(&store, &job).await;
    store.start_task(task.id, 0).await.unwrap().unwrap();

    let stale = store
        .finish_task(task.id, 0, TaskOutcome::Completed { metric: 1 })
        .await
        .unwrap();
    let current = store
        .finish_task(task.id, 1, TaskOutcome::Completed { metric: 1 })
        .await
        .unwrap();
    let repeated = store
        .finish_task(task.id, 1, TaskOutcome::Completed { metric: 1 })
        .await
        .unwrap();

    assert!(!stale);
    assert!(current);
    assert!(!repeated);
}

pub async fn count_active_tasks(store: impl Store) {
    let job = job_with_tasks(&store, 3, 1).await;
    assert_eq!(store.count_active_tasks(job.id).await.unwrap(), 3);

    let task = claimed_task(&store, &job).await;
    assert_eq!(store.count_active_tasks(job.id).await.unwrap(), 3);

    store.start_task(task.id, 0).await.unwrap().unwrap();
    store
        .finish_task(task.id, 1, TaskOutcome::Completed { metric: 1 })
        .await
        .unwrap();
    assert_eq!(store.count_active_tasks(job.id).await.unwrap(), 2);
}

pub async fn list_tasks_by_status(store: impl Store) {
    let job = job_with_tasks(&store, 3, 1).await;
    claimed_task(&store, &job).await;

    let running = store
        .list_tasks(job.id, Some(TaskStatus::Running))
        .await
        .unwrap();
    let pending = store
        .list_tasks(job.id, Some(TaskStatus::Pending))
        .await
        .unwrap();
    let failed = store
        .list_tasks(job.id, Some(TaskStatus::Failed))
        .await
        .unwrap();

    assert_eq!(work_item_ids(&running), vec!["item-0"]);
    assert_eq!(work_item_ids(&pending), vec!["item-1", "item-2"]);
    assert!(failed.is_empty());
}
