use std::collections::HashMap;
use std::mem;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, warn};

use crate::destination::DestinationHandler;
use crate::error::SyncResult;
use crate::pipeline::RecordProducer;
use crate::reporter::StreamReport;
use crate::types::StreamId;
use crate::workers::base::{Worker, WorkerHandle};
use crate::workers::stream_sync::{StreamSyncWorker, StreamSyncWorkerHandle};

/// Internal state for [`StreamSyncWorkerPool`].
#[derive(Debug, Default)]
struct StreamSyncWorkerPoolInner {
    /// Workers still running, indexed by stream.
    active: HashMap<StreamId, StreamSyncWorkerHandle>,
    /// Workers that finished, successfully or not, waiting to be collected.
    finished: HashMap<StreamId, StreamSyncWorkerHandle>,
    /// Notified whenever a worker finishes.
    pool_update: Arc<Notify>,
}

/// Pool tracking the stream sync workers of a run.
///
/// Workers move themselves from active to finished when they complete, which wakes up
/// [`StreamSyncWorkerPool::wait_all`].
#[derive(Debug, Clone, Default)]
pub struct StreamSyncWorkerPool {
    inner: Arc<Mutex<StreamSyncWorkerPoolInner>>,
}

impl StreamSyncWorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a worker and tracks it.
    ///
    /// Returns `Ok(false)` without starting it if a worker for the same stream is already
    /// tracked.
    pub async fn start_worker<D, P>(&self, worker: StreamSyncWorker<D, P>) -> SyncResult<bool>
    where
        D: DestinationHandler + Clone + Send + Sync + 'static,
        P: RecordProducer + Clone + Send + Sync + 'static,
    {
        let stream = worker.stream_id().clone();

        // Held while starting so that a fast worker cannot mark itself finished before it is
        // registered as active.
        let mut inner = self.inner.lock().await;
        if inner.active.contains_key(&stream) || inner.finished.contains_key(&stream) {
            warn!(%stream, "worker for stream already exists in the pool");
            return Ok(false);
        }

        let handle = worker.start().await?;
        inner.active.insert(stream.clone(), handle);
        debug!(%stream, "added worker to the pool");

        Ok(true)
    }

    pub(crate) async fn mark_worker_finished(&self, stream: &StreamId) {
        let mut inner = self.inner.lock().await;
        if let Some(handle) = inner.active.remove(stream) {
            inner.finished.insert(stream.clone(), handle);
        }
        inner.pool_update.notify_waiters();
    }

    /// Waits for every worker to finish and returns their outputs.
    ///
    /// A worker that panicked yields an error for its own stream only.
    pub async fn wait_all(&self) -> Vec<(StreamId, SyncResult<StreamReport>)> {
        loop {
            let inner = self.inner.lock().await;
            if inner.active.is_empty() {
                break;
            }

            // Registered before releasing the lock so that a worker finishing in between
            // cannot be missed.
            let pool_update = inner.pool_update.clone();
            let notified = pool_update.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            drop(inner);

            notified.await;
        }

        let finished = {
            let mut inner = self.inner.lock().await;
            mem::take(&mut inner.finished)
        };

        let mut outputs = Vec::with_capacity(finished.len());
        for (stream, handle) in finished {
            let state = handle.state();
            let output = handle.wait().await;
            if output.is_err() {
                // A panicking worker never reaches the finished phase.
                let phase = state.phase().await;
                error!(%stream, ?phase, "stream sync worker did not complete");
            }
            outputs.push((stream, output));
        }

        outputs
    }
}
