use std::sync::Arc;

use tdsync_config::shared::SyncConfig;
use tracing::debug;

use crate::concurrency::retry::with_retries;
use crate::destination::DestinationHandler;
use crate::error::SyncResult;
use crate::types::{DestinationInitialStatus, StreamConfig};

/// Reads the warehouse state of a stream at the start of a run.
///
/// Probing validates the stream configuration first, so invalid identifiers surface as
/// configuration errors before any warehouse call. The probe itself never mutates the
/// destination and is retried on transient failures.
#[derive(Debug, Clone)]
pub struct InitialStatusProber<D> {
    config: Arc<SyncConfig>,
    destination: D,
}

impl<D> InitialStatusProber<D>
where
    D: DestinationHandler + Clone + Send + Sync + 'static,
{
    pub fn new(config: Arc<SyncConfig>, destination: D) -> Self {
        Self {
            config,
            destination,
        }
    }

    pub async fn probe(
        &self,
        stream: &StreamConfig,
    ) -> SyncResult<DestinationInitialStatus<D::State>> {
        stream.validate()?;

        let status = with_retries(
            &self.config.retry,
            self.config.operation_timeout(),
            "probe",
            || self.destination.probe(stream),
        )
        .await?;

        debug!(
            stream = %stream.id,
            raw_table_exists = status.raw_table_exists(),
            final_table_exists = status.final_table_exists,
            final_table_empty = status.final_table_empty,
            initial_generation_id = status.initial_generation_id,
            "probed destination"
        );

        Ok(status)
    }
}
