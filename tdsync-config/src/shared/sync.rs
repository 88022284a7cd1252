use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shared::{RetryConfig, ValidationError};

/// Configuration of a sync run.
///
/// Bounds how many streams are processed at once, how long a single warehouse
/// call may take, how many raw records are merged per step and how transient
/// failures are retried.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Maximum number of stream pipelines running at the same time.
    ///
    /// Should not exceed the number of connections the destination can safely serve.
    pub max_concurrent_streams: u16,
    /// Timeout applied to every probe, migration and materialization call.
    pub operation_timeout_ms: u64,
    /// Number of raw records typed and merged into the final table per step.
    pub apply_batch_size: usize,
    /// Retry policy for transient destination failures.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl SyncConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    /// Validates the sync configuration, including the nested retry policy.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_concurrent_streams == 0 {
            return Err(ValidationError::MaxConcurrentStreamsZero);
        }

        if self.operation_timeout_ms == 0 {
            return Err(ValidationError::OperationTimeoutZero);
        }

        if self.apply_batch_size == 0 {
            return Err(ValidationError::ApplyBatchSizeZero);
        }

        self.retry.validate()
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_streams: 4,
            operation_timeout_ms: 60_000,
            apply_batch_size: 10_000,
            retry: RetryConfig::default(),
        }
    }
}
