use std::{sync::Arc, time::Duration};

use tokio::task::JoinError;
use tracing::{instrument, Instrument};

use crate::{
    task::Task,
    worker::{ErrorType, GenerationWorker, Metric, WorkerError},
};

/// Invokes the [`GenerationWorker`] for a single attempt of a task.
///
/// The worker runs on its own tokio task so a panicking worker is reported as a failed attempt
/// instead of taking the batch down with it.
#[derive(Clone)]
pub(crate) struct TaskRunner {
    worker: Arc<dyn GenerationWorker>,
    timeout: Option<Duration>,
}

impl TaskRunner {
    pub(crate) fn new(worker: Arc<dyn GenerationWorker>, timeout: Option<Duration>) -> Self {
        Self { worker, timeout }
    }

    pub(crate) fn worker(&self) -> Arc<dyn GenerationWorker> {
        self.worker.clone()
    }

    #[instrument(skip(self, task), fields(task_id = %task.id, attempt = task.attempt_count))]
    pub(crate) async fn run(&self, task: &Task) -> Result<Metric, WorkerError> {
        let task_id = task.id;
        let worker = self.worker.clone();
        let item = task.work_item();
        let timeout = self.timeout;

        tracing::debug!(%task_id, "Executing task {task_id}");
        let fut = async move {
            let generate = worker.generate(&item);
            match timeout {
                Some(timeout) => tokio::time::timeout(timeout, generate)
                    .await
                    .unwrap_or_else(|_elapsed| Err(timeout.into())),
                None => generate.await,
            }
        }
        .in_current_span();

        match tokio::spawn(fut).await {
            Ok(result) => result,
            Err(error) => Err(error.into()),
        }
    }
}

impl From<JoinError> for WorkerError {
    fn from(value: JoinError) -> Self {
        let msg = value.to_string();
        let message = match value.try_into_panic() {
            Ok(panic) => panic
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or(msg),
            Err(_) => msg,
        };
        Self::with_type(ErrorType::Panic, message)
    }
}

impl From<Duration> for WorkerError {
    fn from(value: Duration) -> Self {
        Self::with_type(
            ErrorType::Timeout,
            format!("Task failed to complete within timeout: {value:?}"),
        )
    }
}
