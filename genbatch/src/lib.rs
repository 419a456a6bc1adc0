//! A durable orchestrator for batch generation jobs.
//!
//! A job snapshots the work items eligible for generation into one task per item. Callers then
//! repeatedly advance the job with [`Orchestrator::process_batch`], which claims a bounded slice of
//! pending tasks and invokes the [`worker::GenerationWorker`] for each of them in turn. Failed
//! attempts are retried in later batches until a task runs out of attempts.
//!
//! The orchestrator holds no state of its own. Every job and task lives in a [`store::Store`] and
//! all writes are per-record conditional updates, so any number of orchestrator instances can
//! advance the same job concurrently without processing a task twice.
//!
//! # Example
//!
//! ```
//! # use std::sync::Arc;
//! use genbatch::prelude::*;
//! use genbatch::store::memory::InMemoryStore;
//! use genbatch::testing::{ScriptedWorker, StaticRepository};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
//! let orchestrator = Orchestrator::new(
//!     Arc::new(InMemoryStore::new()),
//!     Arc::new(StaticRepository::with_ids(["lesson-1", "lesson-2"])),
//!     Arc::new(ScriptedWorker::succeeding(3)),
//! )
//! .with_config(OrchestratorConfig::new().with_job(JobConfig::new().with_throttle_ms(0)));
//!
//! let CreateJobOutcome::Created { job_id, total_items } =
//!     orchestrator.create_job(CreateJob::default()).await.unwrap()
//! else {
//!     panic!("Expected a job to be created");
//! };
//! assert_eq!(total_items, 2);
//!
//! orchestrator.process_batch(job_id, None).await.unwrap();
//! let outcome = orchestrator.process_batch(job_id, None).await.unwrap();
//! assert_eq!(outcome, BatchOutcome::Completed);
//!
//! let report = orchestrator.get_status(job_id).await.unwrap();
//! assert_eq!(report.aggregate_metric, 6);
//! assert_eq!(report.progress_percentage, 100);
//! # });
//! ```
use job::{JobId, JobStatus};
use store::StoreError;
use thiserror::Error;
use worker::RepositoryError;

pub mod backoff;
pub mod job;
pub mod orchestrator;
pub mod prelude;
pub mod report;
pub mod rpc;
pub mod store;
pub mod task;
pub mod testing;
pub mod worker;

pub use orchestrator::{Orchestrator, OrchestratorConfig};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Job not found: {0}")]
    JobNotFound(JobId),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Cannot move {job_id} from {from} to {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
    #[error("Error communicating with the store: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}
