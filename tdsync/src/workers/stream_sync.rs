use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tdsync_config::shared::SyncConfig;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info};

use crate::concurrency::retry::with_retries;
use crate::concurrency::shutdown::ShutdownRx;
use crate::destination::DestinationHandler;
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::generation::GenerationManager;
use crate::migrations::{MigrationRegistry, MigrationRunner};
use crate::pipeline::{RecordProducer, SyncRequest};
use crate::prober::InitialStatusProber;
use crate::reporter::{StreamReport, SyncOutcomeReporter};
use crate::state::DestinationState;
use crate::sync_error;
use crate::types::StreamId;
use crate::typing::Applier;
use crate::workers::base::{Worker, WorkerHandle};
use crate::workers::pool::StreamSyncWorkerPool;

/// Stage a stream pipeline is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSyncPhase {
    WaitingForPermit,
    Probing,
    Migrating,
    PreparingGeneration,
    Producing,
    Applying,
    Finished,
}

/// Observable state of a [`StreamSyncWorker`].
#[derive(Debug, Clone)]
pub struct StreamSyncWorkerState {
    phase: Arc<RwLock<StreamSyncPhase>>,
}

impl StreamSyncWorkerState {
    fn new() -> Self {
        Self {
            phase: Arc::new(RwLock::new(StreamSyncPhase::WaitingForPermit)),
        }
    }

    pub async fn phase(&self) -> StreamSyncPhase {
        *self.phase.read().await
    }

    async fn set_phase(&self, stream: &StreamId, phase: StreamSyncPhase) {
        let mut current = self.phase.write().await;
        debug!(%stream, from = ?*current, to = ?phase, "stream phase changing");
        *current = phase;
    }
}

#[derive(Debug)]
pub struct StreamSyncWorkerHandle {
    state: StreamSyncWorkerState,
    handle: Option<JoinHandle<SyncResult<StreamReport>>>,
}

impl WorkerHandle<StreamSyncWorkerState> for StreamSyncWorkerHandle {
    type Output = StreamReport;

    fn state(&self) -> StreamSyncWorkerState {
        self.state.clone()
    }

    async fn wait(mut self) -> SyncResult<StreamReport> {
        let Some(handle) = self.handle.take() else {
            return Err(sync_error!(
                ErrorKind::InvalidState,
                "Stream sync worker was already awaited"
            ));
        };

        handle.await?
    }
}

/// Runs the pipeline of a single stream: probe, migrate, prepare the generation, produce
/// records, materialize them and summarize the outcome.
///
/// A failing stage stops the pipeline of this stream only. The failure is reported in the
/// returned [`StreamReport`] with an incomplete status.
#[derive(Debug)]
pub struct StreamSyncWorker<D, P>
where
    D: DestinationHandler + Sync,
{
    config: Arc<SyncConfig>,
    pool: StreamSyncWorkerPool,
    request: SyncRequest,
    destination: D,
    migrations: Arc<MigrationRegistry<D>>,
    producer: P,
    shutdown_rx: ShutdownRx,
    run_permit: Arc<Semaphore>,
}

impl<D, P> StreamSyncWorker<D, P>
where
    D: DestinationHandler + Sync,
{
    #[expect(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<SyncConfig>,
        pool: StreamSyncWorkerPool,
        request: SyncRequest,
        destination: D,
        migrations: Arc<MigrationRegistry<D>>,
        producer: P,
        shutdown_rx: ShutdownRx,
        run_permit: Arc<Semaphore>,
    ) -> Self {
        Self {
            config,
            pool,
            request,
            destination,
            migrations,
            producer,
            shutdown_rx,
            run_permit,
        }
    }

    pub fn stream_id(&self) -> &StreamId {
        &self.request.config.id
    }
}

impl<D, P> StreamSyncWorker<D, P>
where
    D: DestinationHandler + Clone + Send + Sync + 'static,
    P: RecordProducer + Clone + Send + Sync + 'static,
{
    async fn run(self, state: StreamSyncWorkerState) -> StreamReport {
        let stream = self.request.config.id.clone();
        let mut records_written = None;

        let result = self.run_stages(&state, &mut records_written).await;
        let last_phase = state.phase().await;
        state.set_phase(&stream, StreamSyncPhase::Finished).await;

        match result {
            Ok(report) => report,
            Err(err) => {
                error!(%stream, phase = ?last_phase, error = %err, "stream sync failed");
                StreamReport {
                    summary: SyncOutcomeReporter::summarize_failure(records_written),
                    error: Some(err),
                }
            }
        }
    }

    async fn run_stages(
        &self,
        state: &StreamSyncWorkerState,
        records_written: &mut Option<u64>,
    ) -> SyncResult<StreamReport> {
        let stream = &self.request.config;
        let id = &stream.id;

        debug!(%id, "waiting to acquire a running permit");
        let mut shutdown_rx = self.shutdown_rx.clone();
        let _permit = tokio::select! {
            biased;

            _ = shutdown_rx.wait() => {
                info!(%id, "shutting down stream sync worker while waiting for a run permit");
                return Err(sync_error!(
                    ErrorKind::OperationCanceled,
                    "Sync was canceled",
                    "canceled while waiting for a run permit"
                ));
            }

            permit = self.run_permit.acquire() => {
                permit.map_err(|err| {
                    sync_error!(ErrorKind::InvalidState, "Run permits were closed", err)
                })?
            }
        };

        let prober = InitialStatusProber::new(self.config.clone(), self.destination.clone());
        let runner = MigrationRunner::new(
            self.config.clone(),
            self.destination.clone(),
            self.migrations.clone(),
        );
        let generations = GenerationManager::new(self.config.clone(), self.destination.clone());
        let applier = Applier::new(self.config.clone(), self.destination.clone());

        state.set_phase(id, StreamSyncPhase::Probing).await;
        self.shutdown_rx.check("probe")?;
        let status = prober.probe(stream).await?;

        state.set_phase(id, StreamSyncPhase::Migrating).await;
        let status = runner
            .run(&prober, stream, status, &self.shutdown_rx)
            .await?;

        state.set_phase(id, StreamSyncPhase::PreparingGeneration).await;
        self.shutdown_rx.check("generation planning")?;
        let plan = generations
            .prepare(stream, &status, self.request.soft_reset)
            .await?;

        state.set_phase(id, StreamSyncPhase::Producing).await;
        self.shutdown_rx.check("record production")?;
        let produced = self.producer.produce(stream, &plan).await?;
        *records_written = produced.records_written;

        state.set_phase(id, StreamSyncPhase::Applying).await;
        let applied = applier
            .apply(stream, &plan, &status, &self.shutdown_rx)
            .await?;

        if status.destination_state.needs_soft_reset() {
            let reset_state = status.destination_state.clone().with_soft_reset(false);
            with_retries(
                &self.config.retry,
                self.config.operation_timeout(),
                "commit_state",
                || self.destination.commit_state(id, &reset_state),
            )
            .await?;
            info!(%id, "soft reset completed");
        }

        let summary = SyncOutcomeReporter::summarize(
            id,
            produced.records_written,
            Some(applied.records_applied),
            produced.status,
        )?;

        info!(
            %id,
            generation_id = plan.current_generation_id,
            records_applied = applied.records_applied,
            status = %summary.status_from_source,
            "stream sync finished"
        );

        Ok(StreamReport {
            summary,
            error: None,
        })
    }
}

impl<D, P> Worker<StreamSyncWorkerHandle, StreamSyncWorkerState> for StreamSyncWorker<D, P>
where
    D: DestinationHandler + Clone + Send + Sync + 'static,
    P: RecordProducer + Clone + Send + Sync + 'static,
{
    async fn start(self) -> SyncResult<StreamSyncWorkerHandle> {
        let stream = self.stream_id().clone();
        info!(%stream, "starting stream sync worker");

        let state = StreamSyncWorkerState::new();
        let pool = self.pool.clone();

        let span = tracing::info_span!("stream_sync_worker", stream = %stream);
        let body = self.run(state.clone());
        let worker = async move {
            let result = AssertUnwindSafe(body).catch_unwind().await;
            pool.mark_worker_finished(&stream).await;

            result.map_err(|panic| {
                sync_error!(
                    ErrorKind::StreamSyncWorkerPanic,
                    "Stream sync worker panicked",
                    panic_message(panic.as_ref())
                )
            })
        }
        .instrument(span);

        Ok(StreamSyncWorkerHandle {
            state,
            handle: Some(tokio::spawn(worker)),
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

/// Turns a worker that could not be awaited into a failed stream report.
pub(crate) fn failed_report(err: SyncError) -> StreamReport {
    StreamReport {
        summary: SyncOutcomeReporter::summarize_failure(None),
        error: Some(err),
    }
}
