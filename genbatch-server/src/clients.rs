//! HTTP implementations of the orchestrator's collaborators.
use std::time::Duration;

use async_trait::async_trait;
use genbatch::worker::{
    ErrorType, GenerationWorker, Metric, RepositoryError, WorkItem, WorkItemRepository,
    WorkerError,
};
use serde::{Deserialize, Serialize};

/// Calls `POST {url}` with the work item for every attempt.
///
/// The endpoint answers a successful generation with `{"metric": <count>}`. Any other response
/// is a failed attempt.
pub struct HttpGenerationWorker {
    client: reqwest::Client,
    url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    work_item_id: &'a str,
    payload: &'a serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    metric: Metric,
}

impl HttpGenerationWorker {
    pub fn new(url: impl Into<String>, timeout: Duration) -> reqwest::Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            url: url.into(),
        })
    }
}

#[async_trait]
impl GenerationWorker for HttpGenerationWorker {
    async fn generate(&self, item: &WorkItem) -> Result<Metric, WorkerError> {
        let response = self
            .client
            .post(&self.url)
            .json(&GenerateRequest {
                work_item_id: &item.id,
                payload: &item.payload,
            })
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WorkerError::new(format!(
                "Worker responded with {status}: {body}"
            )));
        }

        response
            .json::<GenerateResponse>()
            .await
            .map(|response| response.metric)
            .map_err(|e| WorkerError::new(format!("Invalid worker response: {e}")))
    }
}

fn transport_error(error: reqwest::Error) -> WorkerError {
    if error.is_timeout() {
        WorkerError::with_type(ErrorType::Timeout, error.to_string())
    } else {
        WorkerError::with_type(ErrorType::Other("transport".to_owned()), error.to_string())
    }
}

/// Lists eligible work items with `GET {url}`, passing the filter as the `filter` query parameter.
///
/// The endpoint answers with a JSON array of `{"id": ..., "payload": ...}` objects.
pub struct HttpWorkItemRepository {
    client: reqwest::Client,
    url: String,
}

impl HttpWorkItemRepository {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl WorkItemRepository for HttpWorkItemRepository {
    async fn list_eligible(&self, filter: Option<String>) -> Result<Vec<WorkItem>, RepositoryError> {
        let mut request = self.client.get(&self.url);
        if let Some(filter) = &filter {
            request = request.query(&[("filter", filter)]);
        }
        request
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| RepositoryError(e.to_string()))?
            .json()
            .await
            .map_err(|e| RepositoryError(format!("Invalid response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_request_is_camel_case() {
        let payload = serde_json::json!({"subject": "math"});
        let request = GenerateRequest {
            work_item_id: "lesson-1",
            payload: &payload,
        };

        assert_eq!(
            serde_json::to_value(request).unwrap(),
            serde_json::json!({"workItemId": "lesson-1", "payload": {"subject": "math"}})
        );
    }

    #[tokio::test]
    async fn unreachable_worker_is_a_failed_attempt() {
        let worker =
            HttpGenerationWorker::new("http://127.0.0.1:9/generate", Duration::from_secs(1))
                .unwrap();

        let result = worker.generate(&WorkItem::new("lesson-1")).await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unreachable_repository_is_an_error() {
        let repository = HttpWorkItemRepository::new("http://127.0.0.1:9/eligible");

        let result = repository.list_eligible(Some("math".to_owned())).await;

        assert!(result.is_err());
    }
}
