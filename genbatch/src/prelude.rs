pub use crate::{
    backoff::{BackoffStrategy, Jitter, RetryBackoff, Strategy},
    job::{config::JobConfigOverrides, Job, JobConfig, JobId, JobStatus},
    orchestrator::{
        BatchOutcome, CreateJob, CreateJobOutcome, Orchestrator, OrchestratorConfig, TaskResult,
    },
    report::JobReport,
    store::Store,
    task::{Task, TaskId, TaskStatus},
    worker::{GenerationWorker, Metric, WorkItem, WorkItemRepository, WorkerError},
    OrchestratorError,
};
