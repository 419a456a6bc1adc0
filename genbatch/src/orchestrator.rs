//! The control logic driving jobs to completion.
use std::{sync::Arc, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{
    backoff::{RetryBackoff, Strategy},
    job::{config::JobConfigOverrides, Job, JobConfig, JobId, JobStatus, NewJob},
    report::JobReport,
    store::Store,
    task::{NewTask, Task, TaskId, TaskOutcome, TaskStatus},
    worker::{GenerationWorker, Metric, WorkItemRepository},
    OrchestratorError,
};

mod runner;

use runner::TaskRunner;

type Result<T> = std::result::Result<T, OrchestratorError>;

/// The error message recorded on a task recovered by [`Orchestrator::recover_stalled`].
pub const STALLED_ERROR: &str = "stalled";

const STATUSES_BEFORE_COMPLETION: [JobStatus; 3] =
    [JobStatus::Pending, JobStatus::Running, JobStatus::Paused];

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OrchestratorConfig {
    /// The config given to new jobs, before any per job overrides.
    pub job: JobConfig,
    /// The maximum time a single worker invocation may take before it counts as a failed attempt.
    pub worker_timeout: Option<Duration>,
}

impl OrchestratorConfig {
    pub const fn new() -> Self {
        Self {
            job: JobConfig::new(),
            worker_timeout: None,
        }
    }

    pub const fn with_job(mut self, job: JobConfig) -> Self {
        self.job = job;
        self
    }

    pub const fn with_worker_timeout(mut self, timeout: Duration) -> Self {
        self.worker_timeout = Some(timeout);
        self
    }
}

/// The request to create a new job.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJob {
    pub name: Option<String>,
    /// Passed through to [`WorkItemRepository::list_eligible`].
    pub filter: Option<String>,
    #[serde(default)]
    pub config: JobConfigOverrides,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateJobOutcome {
    Created { job_id: JobId, total_items: u32 },
    /// There were no eligible work items, no job was created.
    NothingToDo,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    /// The job is paused, nothing was done.
    Paused,
    /// Nothing could be claimed but some tasks are still running or backing off.
    Waiting,
    /// The job has no work left.
    Completed,
    Processed {
        job_id: JobId,
        results: Vec<TaskResult>,
    },
}

impl BatchOutcome {
    pub fn processed_count(&self) -> usize {
        match self {
            Self::Processed { results, .. } => results.len(),
            _ => 0,
        }
    }
}

/// The outcome of one task within a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub task_id: TaskId,
    pub work_item_id: String,
    pub status: TaskStatus,
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_metric: Option<Metric>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskResult {
    fn new(task: &Task, outcome: &TaskOutcome) -> Self {
        let (result_metric, error) = match outcome {
            TaskOutcome::Completed { metric } => (Some(*metric), None),
            TaskOutcome::Retryable { error, .. } | TaskOutcome::Failed { error } => {
                (None, Some(error.clone()))
            }
        };
        Self {
            task_id: task.id,
            work_item_id: task.work_item_id.clone(),
            status: outcome.status(),
            attempt: task.attempt_count,
            result_metric,
            error,
        }
    }
}

/// Creates jobs and advances them batch by batch.
///
/// The orchestrator has no timer and no background task: progress only happens when a caller
/// invokes [`Orchestrator::process_batch`].
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn Store>,
    repository: Arc<dyn WorkItemRepository>,
    runner: TaskRunner,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        repository: Arc<dyn WorkItemRepository>,
        worker: Arc<dyn GenerationWorker>,
    ) -> Self {
        Self {
            store,
            repository,
            runner: TaskRunner::new(worker, None),
            config: OrchestratorConfig::new(),
        }
    }

    pub fn with_config(self, config: OrchestratorConfig) -> Self {
        Self {
            runner: TaskRunner::new(self.runner.worker(), config.worker_timeout),
            config,
            ..self
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Snapshot the eligible work items into a new job with one pending task per item.
    ///
    /// Calling this twice creates two jobs.
    #[instrument(skip(self, request))]
    pub async fn create_job(&self, request: CreateJob) -> Result<CreateJobOutcome> {
        let config = self.config.job.merge(&request.config);
        config.validate()?;

        let items = self.repository.list_eligible(request.filter).await?;
        if items.is_empty() {
            tracing::info!("No eligible work items, not creating a job");
            return Ok(CreateJobOutcome::NothingToDo);
        }
        let total_items = u32::try_from(items.len()).map_err(|_| {
            OrchestratorError::InvalidInput(format!("Too many work items: {}", items.len()))
        })?;

        let name = request
            .name
            .unwrap_or_else(|| format!("generation-{}", Utc::now().format("%Y%m%dT%H%M%S")));
        let tasks = items
            .into_iter()
            .map(|item| NewTask::new(item, config.max_attempts))
            .collect();
        let job = self
            .store
            .insert_job(NewJob {
                name,
                total_items,
                config,
                tasks,
            })
            .await
            .inspect_err(|err| tracing::error!(?err, "Failed to insert the job: {err}"))?;
        let job_id = job.id;

        tracing::info!(%job_id, total_items, "Created {job_id} with {total_items} tasks");
        Ok(CreateJobOutcome::Created {
            job_id,
            total_items,
        })
    }

    /// Advance the job by one batch.
    ///
    /// Claims up to `batch_size` tasks (the job's configured batch size if [`None`]) and runs them
    /// one after the other, sleeping for the job's throttle between two worker invocations.
    #[instrument(skip(self))]
    pub async fn process_batch(
        &self,
        job_id: JobId,
        batch_size: Option<u32>,
    ) -> Result<BatchOutcome> {
        let job = self.load_job(job_id).await?;
        let batch_size = batch_size.unwrap_or(job.config.batch_size);
        if batch_size == 0 {
            return Err(OrchestratorError::InvalidInput(
                "batchSize must be greater than zero".to_owned(),
            ));
        }

        match job.status {
            JobStatus::Paused => {
                tracing::debug!(%job_id, "{job_id} is paused, not processing");
                return Ok(BatchOutcome::Paused);
            }
            JobStatus::Completed => return Ok(BatchOutcome::Completed),
            JobStatus::Pending => self.start_job(job_id).await?,
            JobStatus::Running => {}
        }

        let claimed = self
            .store
            .claim_tasks(job_id, batch_size, Utc::now())
            .await?;
        if claimed.is_empty() {
            return self.complete_if_drained(job_id).await;
        }
        tracing::debug!(%job_id, claimed = claimed.len(), "Claimed {} tasks", claimed.len());

        let results = self.run_batch(&job, claimed).await?;
        Ok(BatchOutcome::Processed { job_id, results })
    }

    /// Load the job and all of its tasks and aggregate them into a [`JobReport`].
    #[instrument(skip(self))]
    pub async fn get_status(&self, job_id: JobId) -> Result<JobReport> {
        let job = self.load_job(job_id).await?;
        let tasks = self.store.list_tasks(job_id, None).await?;
        Ok(JobReport::new(job, &tasks))
    }

    /// Stop new batches from doing any work on the job.
    ///
    /// A batch already in flight runs to completion. Completed jobs cannot be paused.
    #[instrument(skip(self))]
    pub async fn pause_job(&self, job_id: JobId) -> Result<Job> {
        let job = self
            .transition(job_id, &STATUSES_BEFORE_COMPLETION, JobStatus::Paused)
            .await?;
        tracing::info!(%job_id, "Paused {job_id}");
        Ok(job)
    }

    /// Allow batches to make progress on the job again. Completed jobs cannot be resumed.
    #[instrument(skip(self))]
    pub async fn resume_job(&self, job_id: JobId) -> Result<Job> {
        let job = self
            .transition(job_id, &STATUSES_BEFORE_COMPLETION, JobStatus::Running)
            .await?;
        tracing::info!(%job_id, "Resumed {job_id}");
        Ok(job)
    }

    /// The tasks of the job in creation order, optionally restricted to one status.
    #[instrument(skip(self))]
    pub async fn list_tasks(&self, job_id: JobId, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        self.load_job(job_id).await?;
        Ok(self.store.list_tasks(job_id, status).await?)
    }

    /// Release the tasks of the job that have been running for longer than `older_than`.
    ///
    /// This is for tasks left behind by a batch that never finished, e.g. because the process
    /// running it was killed. Such a task returns to pending, or fails if it was on its final
    /// attempt. `older_than` must comfortably exceed the longest a batch can take, otherwise a
    /// live batch may have its tasks taken away.
    ///
    /// Returns the number of recovered tasks.
    #[instrument(skip(self))]
    pub async fn recover_stalled(&self, job_id: JobId, older_than: TimeDelta) -> Result<u32> {
        if older_than < TimeDelta::zero() {
            return Err(OrchestratorError::InvalidInput(
                "olderThan must not be negative".to_owned(),
            ));
        }
        self.load_job(job_id).await?;
        let cutoff = Utc::now()
            .checked_sub_signed(older_than)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let stalled = self
            .store
            .list_tasks(job_id, Some(TaskStatus::Running))
            .await?
            .into_iter()
            .filter(|task| task.started_at.map_or(true, |started_at| started_at < cutoff));

        let mut recovered = 0;
        for task in stalled {
            let task_id = task.id;
            let outcome = if task.is_final_attempt() {
                TaskOutcome::Failed {
                    error: STALLED_ERROR.to_owned(),
                }
            } else {
                TaskOutcome::Retryable {
                    error: STALLED_ERROR.to_owned(),
                    retry_at: None,
                }
            };
            if self.record_outcome(job_id, &task, outcome).await? {
                tracing::warn!(%job_id, %task_id, "Recovered stalled {task_id}");
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    async fn load_job(&self, job_id: JobId) -> Result<Job> {
        self.store
            .load_job(job_id)
            .await?
            .ok_or(OrchestratorError::JobNotFound(job_id))
    }

    async fn transition(&self, job_id: JobId, from: &[JobStatus], to: JobStatus) -> Result<Job> {
        match self.store.transition_job(job_id, from, to).await? {
            Some(job) => Ok(job),
            None => {
                let job = self.load_job(job_id).await?;
                Err(OrchestratorError::InvalidTransition {
                    job_id,
                    from: job.status,
                    to,
                })
            }
        }
    }

    async fn start_job(&self, job_id: JobId) -> Result<()> {
        match self
            .store
            .transition_job(job_id, &[JobStatus::Pending], JobStatus::Running)
            .await?
        {
            Some(_) => tracing::info!(%job_id, "Started {job_id}"),
            None => tracing::debug!(%job_id, "{job_id} was already started"),
        }
        Ok(())
    }

    async fn complete_if_drained(&self, job_id: JobId) -> Result<BatchOutcome> {
        let active = self.store.count_active_tasks(job_id).await?;
        if active > 0 {
            tracing::debug!(%job_id, active, "No claimable tasks, {active} tasks still active");
            return Ok(BatchOutcome::Waiting);
        }

        match self
            .store
            .transition_job(job_id, &[JobStatus::Running], JobStatus::Completed)
            .await?
        {
            Some(job) => {
                tracing::info!(
                    %job_id,
                    completed_items = job.completed_items,
                    failed_items = job.failed_items,
                    "{job_id} completed: {} of {} items completed, {} failed",
                    job.completed_items,
                    job.total_items,
                    job.failed_items,
                );
                Ok(BatchOutcome::Completed)
            }
            None => Ok(match self.load_job(job_id).await?.status {
                JobStatus::Completed => BatchOutcome::Completed,
                JobStatus::Paused => BatchOutcome::Paused,
                JobStatus::Pending | JobStatus::Running => BatchOutcome::Waiting,
            }),
        }
    }

    async fn run_batch(&self, job: &Job, claimed: Vec<Task>) -> Result<Vec<TaskResult>> {
        let throttle = job.config.throttle();
        let mut results = Vec::with_capacity(claimed.len());
        let mut invoked_worker = false;

        for task in claimed {
            // The next attempt only begins once the throttle has elapsed.
            if invoked_worker && !throttle.is_zero() {
                tokio::time::sleep(throttle).await;
            }
            let Some(task) = self.store.start_task(task.id, task.attempt_count).await? else {
                tracing::debug!(task_id = %task.id, "{} is no longer claimed by this batch", task.id);
                continue;
            };
            invoked_worker = true;

            if let Some(result) = self.run_task(job, task).await? {
                results.push(result);
            }
        }
        Ok(results)
    }

    async fn run_task(&self, job: &Job, task: Task) -> Result<Option<TaskResult>> {
        let task_id = task.id;
        let attempt = task.attempt_count;
        let outcome = match self.runner.run(&task).await {
            Ok(metric) => {
                tracing::debug!(%task_id, metric, "{task_id} complete");
                TaskOutcome::Completed { metric }
            }
            Err(error) if task.is_final_attempt() => {
                tracing::error!(
                    %task_id,
                    ?error,
                    "{task_id} failed on attempt {attempt} of {} and will not be retried: {error}",
                    task.max_attempts,
                );
                TaskOutcome::Failed {
                    error: error.to_string(),
                }
            }
            Err(error) => {
                let retry_at = retry_at(&job.config.retry_backoff, attempt);
                tracing::warn!(
                    %task_id,
                    ?error,
                    "{task_id} failed on attempt {attempt} of {} and will be retried: {error}",
                    task.max_attempts,
                );
                TaskOutcome::Retryable {
                    error: error.to_string(),
                    retry_at,
                }
            }
        };

        let result = TaskResult::new(&task, &outcome);
        if self.record_outcome(job.id, &task, outcome).await? {
            Ok(Some(result))
        } else {
            tracing::warn!(
                %task_id,
                "Outcome of {task_id} was not recorded as it was recovered while running"
            );
            Ok(None)
        }
    }

    /// Records the outcome of the task's current attempt and, when it was recorded, counts it
    /// towards the job's progress.
    async fn record_outcome(&self, job_id: JobId, task: &Task, outcome: TaskOutcome) -> Result<bool> {
        let task_id = task.id;
        let delta = outcome.counter_delta();
        let recorded = self
            .store
            .finish_task(task_id, task.attempt_count, outcome)
            .await
            .inspect_err(|err| {
                tracing::error!(?err, %task_id, "Failed to record the outcome of {task_id}: {err}")
            })?;
        if recorded && !delta.is_empty() {
            self.store
                .increment_job_counters(job_id, delta)
                .await
                .inspect_err(|err| {
                    tracing::error!(?err, %job_id, "Failed to update the counters of {job_id}: {err}")
                })?;
        }
        Ok(recorded)
    }
}

fn retry_at(backoff: &RetryBackoff, attempt: u32) -> Option<DateTime<Utc>> {
    let delay = backoff.backoff(attempt);
    (delay > TimeDelta::zero()).then(|| {
        Utc::now()
            .checked_add_signed(delay)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    })
}

#[cfg(test)]
mod tests;
