use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("`max_concurrent_streams` cannot be zero")]
    MaxConcurrentStreamsZero,

    #[error("`operation_timeout_ms` cannot be zero")]
    OperationTimeoutZero,

    #[error("`apply_batch_size` cannot be zero")]
    ApplyBatchSizeZero,

    #[error("`retry.max_attempts` cannot be zero")]
    RetryMaxAttemptsZero,

    #[error("`retry.backoff_factor` must be at least 1.0, got {0}")]
    RetryBackoffFactorTooSmall(f32),
}
