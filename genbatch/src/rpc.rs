//! The action dispatched request/response surface of the [`Orchestrator`].
//!
//! Every request is a JSON object with an `action` field naming the operation, and every response
//! is an [`Envelope`] of the form `{"success": true, ...}` or `{"success": false, "error": "..."}`.
//!
//! ```
//! # use std::sync::Arc;
//! # use serde_json::json;
//! use genbatch::{prelude::*, rpc, store::memory::InMemoryStore, testing::*};
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let orchestrator = Orchestrator::new(
//!     Arc::new(InMemoryStore::new()),
//!     Arc::new(StaticRepository::default()),
//!     Arc::new(ScriptedWorker::succeeding(1)),
//! );
//!
//! let envelope = rpc::handle_json(&orchestrator, json!({"action": "create_job"})).await;
//!
//! assert_eq!(
//!     serde_json::to_value(envelope).unwrap(),
//!     json!({"success": true, "message": "nothing to do"})
//! );
//! # });
//! ```
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{
    job::JobId,
    orchestrator::{BatchOutcome, CreateJob, CreateJobOutcome, TaskResult},
    report::JobReport,
    task::{Task, TaskStatus},
    Orchestrator, OrchestratorError,
};

pub const NOTHING_TO_DO: &str = "nothing to do";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Request {
    CreateJob(CreateJob),
    ProcessBatch {
        job_id: JobId,
        batch_size: Option<u32>,
    },
    GetStatus {
        job_id: JobId,
    },
    PauseJob {
        job_id: JobId,
    },
    ResumeJob {
        job_id: JobId,
    },
    ListTasks {
        job_id: JobId,
        status: Option<TaskStatus>,
    },
    RecoverStalled {
        job_id: JobId,
        older_than_secs: u32,
    },
}

impl Request {
    pub const fn action(&self) -> &'static str {
        match self {
            Self::CreateJob(_) => "create_job",
            Self::ProcessBatch { .. } => "process_batch",
            Self::GetStatus { .. } => "get_status",
            Self::PauseJob { .. } => "pause_job",
            Self::ResumeJob { .. } => "resume_job",
            Self::ListTasks { .. } => "list_tasks",
            Self::RecoverStalled { .. } => "recover_stalled",
        }
    }
}

/// The payload of a successful response, flattened into the [`Envelope`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    #[serde(rename_all = "camelCase")]
    Created { job_id: JobId, total_items: u32 },
    Message { message: &'static str },
    /// A batch that did no work: `paused`, `waiting` or `completed`.
    Status { status: &'static str },
    #[serde(rename_all = "camelCase")]
    Batch {
        job_id: JobId,
        batch_results: Vec<TaskResult>,
        processed_count: usize,
    },
    Report(JobReport),
    #[serde(rename_all = "camelCase")]
    Job { job_id: JobId },
    #[serde(rename_all = "camelCase")]
    Tasks { job_id: JobId, tasks: Vec<Task> },
    #[serde(rename_all = "camelCase")]
    Recovered { job_id: JobId, recovered: u32 },
}

impl From<CreateJobOutcome> for Response {
    fn from(value: CreateJobOutcome) -> Self {
        match value {
            CreateJobOutcome::Created {
                job_id,
                total_items,
            } => Self::Created {
                job_id,
                total_items,
            },
            CreateJobOutcome::NothingToDo => Self::Message {
                message: NOTHING_TO_DO,
            },
        }
    }
}

impl From<BatchOutcome> for Response {
    fn from(value: BatchOutcome) -> Self {
        match value {
            BatchOutcome::Paused => Self::Status { status: "paused" },
            BatchOutcome::Waiting => Self::Status { status: "waiting" },
            BatchOutcome::Completed => Self::Status {
                status: "completed",
            },
            BatchOutcome::Processed { job_id, results } => Self::Batch {
                job_id,
                processed_count: results.len(),
                batch_results: results,
            },
        }
    }
}

/// Who a failed request is attributable to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The request was malformed or not applicable to the job.
    Caller,
    /// A collaborator of the orchestrator failed, e.g. the store was unreachable.
    Server,
}

impl From<&OrchestratorError> for Fault {
    fn from(value: &OrchestratorError) -> Self {
        match value {
            OrchestratorError::Store(_) | OrchestratorError::Repository(_) => Self::Server,
            OrchestratorError::JobNotFound(_)
            | OrchestratorError::InvalidInput(_)
            | OrchestratorError::InvalidTransition { .. } => Self::Caller,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(flatten)]
    pub data: Option<Response>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set on failures only, not part of the wire format.
    #[serde(skip)]
    pub fault: Option<Fault>,
}

impl Envelope {
    pub fn success(data: Response) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            fault: None,
        }
    }

    pub fn failure(fault: Fault, error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            fault: Some(fault),
        }
    }
}

/// Execute the request against the orchestrator, wrapping the outcome in an [`Envelope`].
#[instrument(skip_all, fields(action = request.action()))]
pub async fn dispatch(orchestrator: &Orchestrator, request: Request) -> Envelope {
    match execute(orchestrator, request).await {
        Ok(data) => Envelope::success(data),
        Err(error) => {
            let fault = Fault::from(&error);
            match fault {
                Fault::Server => tracing::error!(?error, "Request failed: {error}"),
                Fault::Caller => tracing::warn!(?error, "Request rejected: {error}"),
            }
            Envelope::failure(fault, error.to_string())
        }
    }
}

/// Parse an untyped request and [`dispatch`] it.
///
/// A request which is not a valid [`Request`] yields a failed envelope.
pub async fn handle_json(orchestrator: &Orchestrator, request: serde_json::Value) -> Envelope {
    match serde_json::from_value::<Request>(request) {
        Ok(request) => dispatch(orchestrator, request).await,
        Err(error) => {
            tracing::warn!(?error, "Malformed request: {error}");
            Envelope::failure(Fault::Caller, format!("Malformed request: {error}"))
        }
    }
}

async fn execute(
    orchestrator: &Orchestrator,
    request: Request,
) -> Result<Response, OrchestratorError> {
    Ok(match request {
        Request::CreateJob(request) => orchestrator.create_job(request).await?.into(),
        Request::ProcessBatch { job_id, batch_size } => {
            orchestrator.process_batch(job_id, batch_size).await?.into()
        }
        Request::GetStatus { job_id } => Response::Report(orchestrator.get_status(job_id).await?),
        Request::PauseJob { job_id } => {
            orchestrator.pause_job(job_id).await?;
            Response::Job { job_id }
        }
        Request::ResumeJob { job_id } => {
            orchestrator.resume_job(job_id).await?;
            Response::Job { job_id }
        }
        Request::ListTasks { job_id, status } => Response::Tasks {
            job_id,
            tasks: orchestrator.list_tasks(job_id, status).await?,
        },
        Request::RecoverStalled {
            job_id,
            older_than_secs,
        } => Response::Recovered {
            job_id,
            recovered: orchestrator
                .recover_stalled(job_id, TimeDelta::seconds(i64::from(older_than_secs)))
                .await?,
        },
    })
}
