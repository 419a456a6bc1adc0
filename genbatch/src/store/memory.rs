//! Provides an in memory implementation of [`Store`].
//!
//! It is not optimized, instead it is designed to be a correct implementation for use in tests
//! and single process setups. Every operation takes the lock of the collection it changes, so
//! each call is atomic with respect to the records it touches.
use std::sync::{
    atomic::{AtomicI32, Ordering},
    Arc, RwLock,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{Store, StoreError};
use crate::{
    job::{CounterDelta, Job, JobId, JobStatus, NewJob},
    task::{Task, TaskId, TaskOutcome, TaskStatus},
};

/// An in memory implementation of [`Store`].
///
/// Clones share the same underlying data.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    jobs: Arc<RwLock<Vec<Job>>>,
    tasks: Arc<RwLock<Vec<Task>>>,
    job_ids: Arc<AtomicI32>,
    task_ids: Arc<AtomicI32>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Job {
    fn apply_transition(&mut self, to: JobStatus, now: DateTime<Utc>) {
        self.status = to;
        match to {
            JobStatus::Running if self.started_at.is_none() => self.started_at = Some(now),
            JobStatus::Completed => self.completed_at = Some(now),
            _ => {}
        }
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_job(&self, job: NewJob) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.write().map_err(|_| StoreError::BadState)?;
        let mut tasks = self.tasks.write().map_err(|_| StoreError::BadState)?;
        let now = Utc::now();
        let id = JobId::from(self.job_ids.fetch_add(1, Ordering::SeqCst));
        tasks.extend(job.tasks.into_iter().map(|task| Task {
            id: self.task_ids.fetch_add(1, Ordering::SeqCst).into(),
            job_id: id,
            work_item_id: task.work_item_id,
            payload: task.payload,
            status: TaskStatus::Pending,
            attempt_count: 0,
            max_attempts: task.max_attempts,
            error_message: None,
            result_metric: None,
            retry_at: None,
            created_at: now,
            started_at: None,
            completed_at: None,
        }));
        let job = Job {
            id,
            name: job.name,
            status: JobStatus::Pending,
            total_items: job.total_items,
            completed_items: 0,
            failed_items: 0,
            config: job.config,
            created_at: now,
            started_at: None,
            completed_at: None,
        };
        jobs.push(job.clone());
        Ok(job)
    }

    async fn load_job(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self
            .jobs
            .read()
            .map_err(|_| StoreError::BadState)?
            .iter()
            .find(|job| job.id == id)
            .cloned())
    }

    async fn transition_job(
        &self,
        id: JobId,
        from: &[JobStatus],
        to: JobStatus,
    ) -> Result<Option<Job>, StoreError> {
        let mut jobs = self.jobs.write().map_err(|_| StoreError::BadState)?;
        Ok(jobs
            .iter_mut()
            .find(|job| job.id == id && from.contains(&job.status))
            .map(|job| {
                job.apply_transition(to, Utc::now());
                job.clone()
            }))
    }

    async fn increment_job_counters(
        &self,
        id: JobId,
        delta: CounterDelta,
    ) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().map_err(|_| StoreError::BadState)?;
        match jobs.iter_mut().find(|job| job.id == id) {
            None => Err(StoreError::JobNotFound(id)),
            Some(job) => {
                job.completed_items += delta.completed;
                job.failed_items += delta.failed;
                Ok(())
            }
        }
    }

    async fn claim_tasks(
        &self,
        job_id: JobId,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Task>, StoreError> {
        let mut tasks = self.tasks.write().map_err(|_| StoreError::BadState)?;
        let claimed = tasks
            .iter_mut()
            .filter(|task| task.job_id == job_id && task.is_claimable(now))
            .take(limit as usize)
            .map(|task| {
                task.mark_running(Utc::now());
                task.clone()
            })
            .collect();
        Ok(claimed)
    }

    async fn start_task(&self, id: TaskId, attempt: u32) -> Result<Option<Task>, StoreError> {
        let mut tasks = self.tasks.write().map_err(|_| StoreError::BadState)?;
        Ok(tasks
            .iter_mut()
            .find(|task| {
                task.id == id && task.status == TaskStatus::Running && task.attempt_count == attempt
            })
            .map(|task| {
                task.mark_started(Utc::now());
                task.clone()
            }))
    }

    async fn finish_task(
        &self,
        id: TaskId,
        attempt: u32,
        outcome: TaskOutcome,
    ) -> Result<bool, StoreError> {
        let mut tasks = self.tasks.write().map_err(|_| StoreError::BadState)?;
        match tasks.iter_mut().find(|task| {
            task.id == id && task.status == TaskStatus::Running && task.attempt_count == attempt
        }) {
            None => Ok(false),
            Some(task) => {
                task.apply(outcome, Utc::now());
                Ok(true)
            }
        }
    }

    async fn count_active_tasks(&self, job_id: JobId) -> Result<u64, StoreError> {
        Ok(self
            .tasks
            .read()
            .map_err(|_| StoreError::BadState)?
            .iter()
            .filter(|task| task.job_id == job_id && task.status.is_active())
            .count() as u64)
    }

    async fn list_tasks(
        &self,
        job_id: JobId,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Task>, StoreError> {
        Ok(self
            .tasks
            .read()
            .map_err(|_| StoreError::BadState)?
            .iter()
            .filter(|task| task.job_id == job_id && status.map_or(true, |s| task.status == s))
            .cloned()
            .collect())
    }
}
