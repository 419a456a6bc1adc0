//! The external collaborators driven by the orchestrator.
//!
//! A [`WorkItemRepository`] enumerates the items eligible for generation when a job is created
//! and a [`GenerationWorker`] performs the generation of a single item. Both are plain traits so
//! they can be implemented as an HTTP client, an in-process call, or a queue producer.
use std::fmt::Display;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The measure of work reported by a successful generation, e.g. the number of slides produced.
pub type Metric = u64;

/// A unit of content eligible for generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub id: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl WorkItem {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_payload(self, payload: serde_json::Value) -> Self {
        Self { payload, ..self }
    }
}

/// Enumerates the work items eligible for generation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WorkItemRepository: Send + Sync {
    /// List the eligible items, optionally narrowed down by a repository specific filter.
    async fn list_eligible(&self, filter: Option<String>) -> Result<Vec<WorkItem>, RepositoryError>;
}

#[derive(Debug, Error)]
#[error("Failed to list eligible work items: {0}")]
pub struct RepositoryError(pub String);

/// Performs one unit of generation for a work item.
///
/// Implementations are expected to be idempotent: a task may be attempted more than once, and
/// in rare cases (see [`crate::Orchestrator::recover_stalled`]) the same attempt may be executed
/// twice.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenerationWorker: Send + Sync {
    async fn generate(&self, item: &WorkItem) -> Result<Metric, WorkerError>;
}

/// A failed generation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{error_type}: {message}")]
pub struct WorkerError {
    pub error_type: ErrorType,
    pub message: String,
}

impl WorkerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error_type: ErrorType::Generation,
            message: message.into(),
        }
    }

    pub fn with_type(error_type: ErrorType, message: impl Into<String>) -> Self {
        Self {
            error_type,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorType {
    /// The worker reported a failure.
    Generation,
    /// The worker panicked.
    Panic,
    /// The worker did not finish within the configured timeout.
    Timeout,
    Other(String),
}

impl Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let val = match self {
            Self::Generation => "generation",
            Self::Panic => "panic",
            Self::Timeout => "timeout",
            Self::Other(val) => val,
        };
        write!(f, "{val}")
    }
}
