//! Jobs are a single batch generation run tracked to completion.
use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::NewTask;

pub mod config;

pub use config::JobConfig;

/// The identifier of a [`Job`].
#[derive(Debug, Eq, PartialEq, Clone, Copy, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(i32);

impl From<i32> for JobId {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl From<JobId> for i32 {
    fn from(value: JobId) -> Self {
        value.0
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JobId({})", self.0)
    }
}

/// The status of a [`Job`].
///
/// A job only ever moves `Pending -> Running -> {Paused <-> Running} -> Completed`. There is no
/// failed state for a job: failed tasks are tracked through [`Job::failed_items`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Paused,
    Completed,
}

impl JobStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub status: JobStatus,
    pub total_items: u32,
    pub completed_items: u32,
    pub failed_items: u32,
    pub config: JobConfig,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// The number of tasks which have reached a terminal state.
    pub fn processed_items(&self) -> u32 {
        self.completed_items + self.failed_items
    }

    /// `round(completed_items / total_items * 100)`, or zero for a job without items.
    pub fn progress_percentage(&self) -> u32 {
        if self.total_items == 0 {
            return 0;
        }
        (f64::from(self.completed_items) / f64::from(self.total_items) * 100.0).round() as u32
    }
}

/// The data required by a store to insert a new [`Job`] and its tasks.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub name: String,
    /// The number of `tasks`.
    pub total_items: u32,
    pub config: JobConfig,
    pub tasks: Vec<NewTask>,
}

/// A change to the progress counters of a [`Job`].
///
/// Stores apply this as an increment rather than overwriting the counters so that concurrent
/// batches working on different tasks of the same job never lose updates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterDelta {
    pub completed: u32,
    pub failed: u32,
}

impl CounterDelta {
    pub const COMPLETED: Self = Self {
        completed: 1,
        failed: 0,
    };
    pub const FAILED: Self = Self {
        completed: 0,
        failed: 1,
    };

    pub const fn is_empty(&self) -> bool {
        self.completed == 0 && self.failed == 0
    }
}
