//! Entry point of the sync engine.
//!
//! A [`SyncPipeline`] runs one pipeline per requested stream, in parallel up to the
//! configured number of concurrent streams, and collects their outcomes into a
//! [`SyncReport`]. A failing stream never stops its siblings.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use metrics::counter;
use tdsync_config::shared::SyncConfig;
use tokio::sync::Semaphore;
use tracing::{error, info};

use crate::bail;
use crate::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use crate::destination::DestinationHandler;
use crate::error::{ErrorKind, SyncResult};
use crate::generation::GenerationPlan;
use crate::metrics::{DESTINATION, OUTCOME, TDSYNC_STREAM_SYNCS_TOTAL, register_metrics};
use crate::migrations::MigrationRegistry;
use crate::reporter::{StreamStatus, SyncReport};
use crate::types::StreamConfig;
use crate::workers::pool::StreamSyncWorkerPool;
use crate::workers::stream_sync::{StreamSyncWorker, failed_report};

/// A stream to sync in a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    pub config: StreamConfig,
    /// Forces a new generation, replaying the final table from the records of this run only.
    pub soft_reset: bool,
}

impl SyncRequest {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            soft_reset: false,
        }
    }

    pub fn soft_reset(config: StreamConfig) -> Self {
        Self {
            config,
            soft_reset: true,
        }
    }
}

/// What a [`RecordProducer`] reports after staging the records of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProducerOutcome {
    /// Number of records staged, if the producer tracked it.
    pub records_written: Option<u64>,
    /// Completion status reported by the source.
    pub status: StreamStatus,
}

/// Collaborator durably staging the raw records of a stream before materialization.
///
/// Records staged during a run must be tagged with
/// [`GenerationPlan::current_generation_id`].
pub trait RecordProducer {
    fn produce(
        &self,
        stream: &StreamConfig,
        plan: &GenerationPlan,
    ) -> impl Future<Output = SyncResult<ProducerOutcome>> + Send;
}

/// Runs stream pipelines against a destination.
#[derive(Debug)]
pub struct SyncPipeline<D>
where
    D: DestinationHandler + Sync,
{
    config: Arc<SyncConfig>,
    destination: D,
    migrations: Arc<MigrationRegistry<D>>,
    shutdown_tx: ShutdownTx,
}

impl<D> SyncPipeline<D>
where
    D: DestinationHandler + Clone + Send + Sync + 'static,
{
    pub fn new(config: SyncConfig, destination: D, migrations: MigrationRegistry<D>) -> Self {
        // Safe to call for every pipeline, metrics are described once.
        register_metrics();
        let (shutdown_tx, _) = create_shutdown_channel();

        Self {
            config: Arc::new(config),
            destination,
            migrations: Arc::new(migrations),
            shutdown_tx,
        }
    }

    /// Returns a handle to cancel running and future runs of this pipeline.
    ///
    /// Cancellation is observed between stages and between merge steps.
    pub fn shutdown_tx(&self) -> ShutdownTx {
        self.shutdown_tx.clone()
    }

    /// Requests every running stream pipeline to stop.
    pub fn shutdown(&self) {
        self.shutdown_tx.shutdown();

        info!("shut down signal sent to all stream workers");
    }

    /// Syncs every requested stream and reports the outcome of each.
    ///
    /// Fails as a whole only on an invalid sync configuration or duplicate stream requests.
    /// Any other failure is confined to its stream and reported in the [`SyncReport`].
    pub async fn run<P>(&self, requests: Vec<SyncRequest>, producer: P) -> SyncResult<SyncReport>
    where
        P: RecordProducer + Clone + Send + Sync + 'static,
    {
        if let Err(err) = self.config.validate() {
            bail!(ErrorKind::ConfigError, "Invalid sync configuration", err);
        }

        {
            let mut seen = HashSet::new();
            for request in &requests {
                if !seen.insert(&request.config.id) {
                    bail!(
                        ErrorKind::ConfigError,
                        "Stream was requested more than once",
                        format!("stream {}", request.config.id)
                    );
                }
            }
        }

        info!(
            destination = D::name(),
            streams = requests.len(),
            max_concurrent_streams = self.config.max_concurrent_streams,
            "starting sync run"
        );

        let pool = StreamSyncWorkerPool::new();
        let run_permits = Arc::new(Semaphore::new(self.config.max_concurrent_streams as usize));

        for request in requests {
            let worker = StreamSyncWorker::new(
                self.config.clone(),
                pool.clone(),
                request,
                self.destination.clone(),
                self.migrations.clone(),
                producer.clone(),
                self.shutdown_tx.subscribe(),
                run_permits.clone(),
            );
            pool.start_worker(worker).await?;
        }

        let mut report = SyncReport::new();
        for (stream, result) in pool.wait_all().await {
            let stream_report = result.unwrap_or_else(failed_report);

            let outcome = match (&stream_report.error, stream_report.summary.status_from_source) {
                (Some(_), _) => "failed",
                (None, StreamStatus::Complete) => "complete",
                (None, _) => "incomplete",
            };
            counter!(TDSYNC_STREAM_SYNCS_TOTAL, DESTINATION => D::name(), OUTCOME => outcome)
                .increment(1);

            report.insert(stream, stream_report)?;
        }

        let failed = report.errors().len();
        if failed > 0 {
            error!(failed, streams = report.len(), "sync run finished with failed streams");
        } else {
            info!(streams = report.len(), "sync run finished");
        }

        Ok(report)
    }
}
