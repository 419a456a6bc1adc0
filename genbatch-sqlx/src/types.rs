use chrono::{DateTime, Utc};
use genbatch::{job::JobConfig, store::StoreError};
use sqlx::{
    postgres::{PgHasArrayType, PgTypeInfo},
    prelude::FromRow,
    types::Json,
};

#[derive(sqlx::Type, Debug, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "genbatch_job_status", rename_all = "lowercase")]
pub(crate) enum JobStatus {
    Pending,
    Running,
    Paused,
    Completed,
}

impl PgHasArrayType for JobStatus {
    fn array_type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("_genbatch_job_status")
    }
}

impl From<JobStatus> for genbatch::job::JobStatus {
    fn from(value: JobStatus) -> Self {
        match value {
            JobStatus::Pending => Self::Pending,
            JobStatus::Running => Self::Running,
            JobStatus::Paused => Self::Paused,
            JobStatus::Completed => Self::Completed,
        }
    }
}

impl From<genbatch::job::JobStatus> for JobStatus {
    fn from(value: genbatch::job::JobStatus) -> Self {
        match value {
            genbatch::job::JobStatus::Pending => Self::Pending,
            genbatch::job::JobStatus::Running => Self::Running,
            genbatch::job::JobStatus::Paused => Self::Paused,
            genbatch::job::JobStatus::Completed => Self::Completed,
        }
    }
}

#[derive(sqlx::Type, Debug, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "genbatch_task_status", rename_all = "lowercase")]
pub(crate) enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl From<TaskStatus> for genbatch::task::TaskStatus {
    fn from(value: TaskStatus) -> Self {
        match value {
            TaskStatus::Pending => Self::Pending,
            TaskStatus::Running => Self::Running,
            TaskStatus::Completed => Self::Completed,
            TaskStatus::Failed => Self::Failed,
        }
    }
}

impl From<genbatch::task::TaskStatus> for TaskStatus {
    fn from(value: genbatch::task::TaskStatus) -> Self {
        match value {
            genbatch::task::TaskStatus::Pending => Self::Pending,
            genbatch::task::TaskStatus::Running => Self::Running,
            genbatch::task::TaskStatus::Completed => Self::Completed,
            genbatch::task::TaskStatus::Failed => Self::Failed,
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct Job {
    pub id: i32,
    pub name: String,
    pub status: JobStatus,
    pub total_items: i32,
    pub completed_items: i32,
    pub failed_items: i32,
    pub config: Json<JobConfig>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<Job> for genbatch::job::Job {
    type Error = StoreError;

    fn try_from(value: Job) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.id.into(),
            name: value.name,
            status: value.status.into(),
            total_items: unsigned("total_items", value.total_items)?,
            completed_items: unsigned("completed_items", value.completed_items)?,
            failed_items: unsigned("failed_items", value.failed_items)?,
            config: value.config.0,
            created_at: value.created_at,
            started_at: value.started_at,
            completed_at: value.completed_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct Task {
    pub id: i32,
    pub job_id: i32,
    pub work_item_id: String,
    pub payload: serde_json::Value,
    pub status: TaskStatus,
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub error_message: Option<String>,
    pub result_metric: Option<i64>,
    pub retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<Task> for genbatch::task::Task {
    type Error = StoreError;

    fn try_from(value: Task) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.id.into(),
            job_id: value.job_id.into(),
            work_item_id: value.work_item_id,
            payload: value.payload,
            status: value.status.into(),
            attempt_count: unsigned("attempt_count", value.attempt_count)?,
            max_attempts: unsigned("max_attempts", value.max_attempts)?,
            error_message: value.error_message,
            result_metric: value
                .result_metric
                .map(|metric| {
                    u64::try_from(metric).map_err(|_| invalid("result_metric", metric))
                })
                .transpose()?,
            retry_at: value.retry_at,
            created_at: value.created_at,
            started_at: value.started_at,
            completed_at: value.completed_at,
        })
    }
}

fn unsigned(column: &str, value: i32) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| invalid(column, value))
}

fn invalid(column: &str, value: impl std::fmt::Display) -> StoreError {
    StoreError::InvalidRecord(format!("{column} must not be negative, got {value}"))
}

/// Converts a count or attempt number into the `INTEGER` column type.
pub(crate) fn signed(column: &str, value: u32) -> Result<i32, StoreError> {
    i32::try_from(value)
        .map_err(|_| StoreError::InvalidRecord(format!("{column} is out of range: {value}")))
}
