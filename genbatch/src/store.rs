//! The durable storage of jobs and tasks.
//!
//! The orchestrator keeps no state in memory: everything lives behind a [`Store`]. A store is
//! only required to provide per-record atomic updates. The operations that guard correctness
//! under concurrent batches are all conditional on the record's current state:
//!
//! - [`Store::transition_job`] only applies when the job is in one of the expected statuses,
//! - [`Store::claim_tasks`] only claims tasks that are still pending,
//! - [`Store::start_task`] and [`Store::finish_task`] only apply to a running task at the
//!   expected attempt,
//!
//! and job counters are changed with [`Store::increment_job_counters`] rather than by writing the
//! whole job back.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    job::{CounterDelta, Job, JobId, JobStatus, NewJob},
    task::{Task, TaskId, TaskOutcome, TaskStatus},
};

pub mod memory;
pub mod testing;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a new pending job together with its pending tasks.
    ///
    /// Either the job and all of its tasks are stored or nothing is. Tasks are claimed in the
    /// order they are given.
    async fn insert_job(&self, job: NewJob) -> Result<Job, StoreError>;

    async fn load_job(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    /// Move the job to `to` if, and only if, its current status is one of `from`.
    ///
    /// Moving to [`JobStatus::Running`] stamps `started_at` when it has not been set yet and
    /// moving to [`JobStatus::Completed`] stamps `completed_at`.
    ///
    /// Returns the updated job, or [`None`] if the job does not exist or the condition did not
    /// hold.
    async fn transition_job(
        &self,
        id: JobId,
        from: &[JobStatus],
        to: JobStatus,
    ) -> Result<Option<Job>, StoreError>;

    /// Atomically add `delta` to the job's completed and failed counters.
    async fn increment_job_counters(&self, id: JobId, delta: CounterDelta)
        -> Result<(), StoreError>;

    /// Claim up to `limit` tasks of the job that are claimable at `now`, in creation order.
    ///
    /// Claimed tasks are moved to [`TaskStatus::Running`] with `started_at` stamped. A task is
    /// only ever returned by one concurrent call.
    async fn claim_tasks(
        &self,
        job_id: JobId,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Task>, StoreError>;

    /// Begin a new attempt of a claimed task: stamps `started_at` and increments `attempt_count`.
    ///
    /// Only applies if the task is running with `attempt_count == attempt`.
    async fn start_task(&self, id: TaskId, attempt: u32) -> Result<Option<Task>, StoreError>;

    /// Record the outcome of the attempt.
    ///
    /// Only applies if the task is running with `attempt_count == attempt`. Returns whether the
    /// outcome was recorded.
    async fn finish_task(
        &self,
        id: TaskId,
        attempt: u32,
        outcome: TaskOutcome,
    ) -> Result<bool, StoreError>;

    /// The number of the job's tasks which are pending or running.
    async fn count_active_tasks(&self, job_id: JobId) -> Result<u64, StoreError>;

    /// The tasks of the job in creation order, optionally restricted to one status.
    async fn list_tasks(
        &self,
        job_id: JobId,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Task>, StoreError>;
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    JobNotFound(JobId),
    #[error("Error encoding or decoding data")]
    EncodeDecode(#[from] serde_json::Error),
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
    #[error("Store in bad state")]
    BadState,
    #[error("Error communicating with the store")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}
