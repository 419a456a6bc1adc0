//! Status aggregation over a job and its tasks.
use serde::Serialize;

use crate::{
    job::Job,
    task::{Task, TaskStatus},
    worker::Metric,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskCounts {
    pub pending: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
}

impl TaskCounts {
    fn record(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Pending => self.pending += 1,
            TaskStatus::Running => self.running += 1,
            TaskStatus::Completed => self.completed += 1,
            TaskStatus::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.running + self.completed + self.failed
    }
}

/// A job enriched with figures derived from its tasks.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReport {
    pub job: Job,
    pub tasks_by_status: TaskCounts,
    /// The sum of the result metric of all completed tasks, saturating at `u64::MAX`.
    pub aggregate_metric: Metric,
    pub progress_percentage: u32,
}

impl JobReport {
    pub fn new(job: Job, tasks: &[Task]) -> Self {
        let mut tasks_by_status = TaskCounts::default();
        let mut aggregate_metric: Metric = 0;
        for task in tasks {
            tasks_by_status.record(task.status);
            if task.status == TaskStatus::Completed {
                aggregate_metric =
                    aggregate_metric.saturating_add(task.result_metric.unwrap_or_default());
            }
        }
        Self {
            progress_percentage: job.progress_percentage(),
            job,
            tasks_by_status,
            aggregate_metric,
        }
    }
}
