use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    backoff::{RetryBackoff, MAX_JITTER_PERCENT},
    OrchestratorError,
};

const DEFAULT_BATCH_SIZE: u32 = 10;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_THROTTLE_MS: u64 = 1000;

/// Per job configuration, fixed when the job is created.
///
/// # Example
///
/// ```
/// # use genbatch::prelude::*;
/// let config = JobConfig::new()
///     .with_batch_size(5)
///     .with_max_attempts(2)
///     .with_throttle_ms(250);
///
/// assert_eq!(config.batch_size, 5);
/// assert_eq!(config.throttle(), std::time::Duration::from_millis(250));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobConfig {
    /// The number of tasks claimed by a batch when the caller does not specify one.
    pub batch_size: u32,
    /// The number of attempts a task gets before it is marked as failed.
    pub max_attempts: u32,
    /// The delay between two worker invocations in the same batch.
    pub throttle_ms: u64,
    /// The delay before a failed, non final, attempt becomes claimable again.
    pub retry_backoff: RetryBackoff,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl JobConfig {
    pub const fn new() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            throttle_ms: DEFAULT_THROTTLE_MS,
            retry_backoff: RetryBackoff::None,
        }
    }

    pub const fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub const fn with_throttle_ms(mut self, throttle_ms: u64) -> Self {
        self.throttle_ms = throttle_ms;
        self
    }

    pub const fn with_retry_backoff(mut self, retry_backoff: RetryBackoff) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }

    pub const fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    /// Applies the values set in `overrides` on top of this config.
    pub fn merge(self, overrides: &JobConfigOverrides) -> Self {
        Self {
            batch_size: overrides.batch_size.unwrap_or(self.batch_size),
            max_attempts: overrides.max_attempts.unwrap_or(self.max_attempts),
            throttle_ms: overrides.throttle_ms.unwrap_or(self.throttle_ms),
            retry_backoff: overrides.retry_backoff.unwrap_or(self.retry_backoff),
        }
    }

    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.batch_size == 0 {
            return Err(OrchestratorError::InvalidInput(
                "batchSize must be greater than zero".to_owned(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(OrchestratorError::InvalidInput(
                "maxAttempts must be greater than zero".to_owned(),
            ));
        }
        if self
            .retry_backoff
            .jitter_percent()
            .is_some_and(|percent| percent > MAX_JITTER_PERCENT)
        {
            return Err(OrchestratorError::InvalidInput(format!(
                "retryBackoff.jitterPercent must not exceed {MAX_JITTER_PERCENT}"
            )));
        }
        Ok(())
    }
}

/// Optional per job overrides of the orchestrator's default [`JobConfig`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobConfigOverrides {
    pub batch_size: Option<u32>,
    pub max_attempts: Option<u32>,
    pub throttle_ms: Option<u64>,
    pub retry_backoff: Option<RetryBackoff>,
}
