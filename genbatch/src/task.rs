//! Tasks are the independently retryable units of work of a [`crate::job::Job`].
use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    job::JobId,
    worker::{Metric, WorkItem},
};

#[derive(Debug, Eq, PartialEq, Clone, Copy, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(i32);

impl From<i32> for TaskId {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl From<TaskId> for i32 {
    fn from(value: TaskId) -> Self {
        value.0
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TaskId({})", self.0)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Pending and running tasks still have work to do.
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub job_id: JobId,
    pub work_item_id: String,
    /// Snapshot of the work item taken when the job was created.
    pub payload: serde_json::Value,
    pub status: TaskStatus,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub error_message: Option<String>,
    pub result_metric: Option<Metric>,
    /// A pending task is not claimable before this instant.
    pub retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn is_final_attempt(&self) -> bool {
        self.attempt_count >= self.max_attempts
    }

    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending
            && self.attempt_count < self.max_attempts
            && self.retry_at.map_or(true, |retry_at| retry_at <= now)
    }

    pub fn work_item(&self) -> WorkItem {
        WorkItem {
            id: self.work_item_id.clone(),
            payload: self.payload.clone(),
        }
    }

    pub(crate) fn mark_running(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Running;
        self.started_at = Some(now);
    }

    pub(crate) fn mark_started(&mut self, now: DateTime<Utc>) {
        self.started_at = Some(now);
        self.attempt_count += 1;
    }

    pub(crate) fn apply(&mut self, outcome: TaskOutcome, now: DateTime<Utc>) {
        match outcome {
            TaskOutcome::Completed { metric } => {
                self.status = TaskStatus::Completed;
                self.result_metric = Some(metric);
                self.retry_at = None;
                self.completed_at = Some(now);
            }
            TaskOutcome::Retryable { error, retry_at } => {
                self.status = TaskStatus::Pending;
                self.error_message = Some(error);
                self.retry_at = retry_at;
            }
            TaskOutcome::Failed { error } => {
                self.status = TaskStatus::Failed;
                self.error_message = Some(error);
                self.retry_at = None;
                self.completed_at = Some(now);
            }
        }
    }
}

/// The data required by a store to insert a new [`Task`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub work_item_id: String,
    pub payload: serde_json::Value,
    pub max_attempts: u32,
}

impl NewTask {
    pub fn new(item: WorkItem, max_attempts: u32) -> Self {
        Self {
            work_item_id: item.id,
            payload: item.payload,
            max_attempts,
        }
    }
}

/// The recorded result of a single attempt at a task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed {
        metric: Metric,
    },
    /// The attempt failed but the task has attempts left; it returns to pending.
    Retryable {
        error: String,
        retry_at: Option<DateTime<Utc>>,
    },
    /// The final attempt failed.
    Failed {
        error: String,
    },
}

impl TaskOutcome {
    pub const fn status(&self) -> TaskStatus {
        match self {
            Self::Completed { .. } => TaskStatus::Completed,
            Self::Retryable { .. } => TaskStatus::Pending,
            Self::Failed { .. } => TaskStatus::Failed,
        }
    }

    pub(crate) fn counter_delta(&self) -> crate::job::CounterDelta {
        match self {
            Self::Completed { .. } => crate::job::CounterDelta::COMPLETED,
            Self::Retryable { .. } => crate::job::CounterDelta::default(),
            Self::Failed { .. } => crate::job::CounterDelta::FAILED,
        }
    }
}
