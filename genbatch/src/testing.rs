//! In-memory collaborators for exercising an [`crate::Orchestrator`] without external services.
use std::{
    collections::{HashMap, VecDeque},
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;

use crate::worker::{GenerationWorker, Metric, RepositoryError, WorkItem, WorkItemRepository, WorkerError};

/// A [`GenerationWorker`] with scripted results which records every invocation.
///
/// Each work item can be given a queue of results which are returned by successive calls for that
/// item. Once an item's queue is exhausted, or if it has none, the default result is returned.
///
/// ```
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// use genbatch::prelude::*;
/// use genbatch::testing::ScriptedWorker;
///
/// let worker = ScriptedWorker::succeeding(5)
///     .with_script("flaky", [Err(WorkerError::new("rate limited"))]);
/// let flaky = WorkItem::new("flaky");
///
/// assert!(worker.generate(&flaky).await.is_err());
/// assert_eq!(worker.generate(&flaky).await, Ok(5));
/// assert_eq!(worker.calls(), ["flaky", "flaky"]);
/// # });
/// ```
#[derive(Debug)]
pub struct ScriptedWorker {
    default: Result<Metric, WorkerError>,
    delay: Option<Duration>,
    scripts: Mutex<HashMap<String, VecDeque<Result<Metric, WorkerError>>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedWorker {
    pub fn succeeding(metric: Metric) -> Self {
        Self::with_default(Ok(metric))
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_default(Err(WorkerError::new(message)))
    }

    fn with_default(default: Result<Metric, WorkerError>) -> Self {
        Self {
            default,
            delay: None,
            scripts: Mutex::default(),
            calls: Mutex::default(),
        }
    }

    /// Queue results to be returned by calls for `item_id`, in order.
    pub fn with_script(
        self,
        item_id: impl Into<String>,
        results: impl IntoIterator<Item = Result<Metric, WorkerError>>,
    ) -> Self {
        lock(&self.scripts)
            .entry(item_id.into())
            .or_default()
            .extend(results);
        self
    }

    /// Sleep for `delay` on every call before returning.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// The ids of the work items the worker was called for, in call order.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self, item_id: &str) -> usize {
        lock(&self.calls).iter().filter(|id| *id == item_id).count()
    }
}

#[async_trait]
impl GenerationWorker for ScriptedWorker {
    async fn generate(&self, item: &WorkItem) -> Result<Metric, WorkerError> {
        lock(&self.calls).push(item.id.clone());
        let scripted = lock(&self.scripts)
            .get_mut(&item.id)
            .and_then(VecDeque::pop_front);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        scripted.unwrap_or_else(|| self.default.clone())
    }
}

/// A [`WorkItemRepository`] over a fixed list of items.
///
/// A filter keeps the items whose id contains it.
#[derive(Debug, Clone, Default)]
pub struct StaticRepository {
    items: Vec<WorkItem>,
}

impl StaticRepository {
    pub fn new(items: impl IntoIterator<Item = WorkItem>) -> Self {
        Self {
            items: items.into_iter().collect(),
        }
    }

    pub fn with_ids<S: Into<String>>(ids: impl IntoIterator<Item = S>) -> Self {
        Self::new(ids.into_iter().map(WorkItem::new))
    }
}

#[async_trait]
impl WorkItemRepository for StaticRepository {
    async fn list_eligible(&self, filter: Option<String>) -> Result<Vec<WorkItem>, RepositoryError> {
        Ok(self
            .items
            .iter()
            .filter(|item| filter.as_deref().map_or(true, |filter| item.id.contains(filter)))
            .cloned()
            .collect())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
