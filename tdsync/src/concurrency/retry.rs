use std::future::Future;
use std::time::Duration;

use tdsync_config::shared::RetryConfig;
use tracing::warn;

use crate::error::SyncResult;

/// Runs `operation` under `timeout`, retrying transient failures with exponential backoff.
///
/// A timed out attempt counts as a transient failure. Non-transient errors and the error of
/// the last allowed attempt are returned as is.
pub async fn with_retries<T, F, Fut>(
    retry: &RetryConfig,
    timeout: Duration,
    name: &'static str,
    mut operation: F,
) -> SyncResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SyncResult<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;

        let result = match tokio::time::timeout(timeout, operation()).await {
            Ok(result) => result,
            Err(elapsed) => Err(elapsed.into()),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < retry.max_attempts => {
                let delay = retry.delay_for_attempt(attempt);
                warn!(
                    operation = name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient destination failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
