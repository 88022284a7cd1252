use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::destination::memory::MemoryDestination;
use crate::error::{ErrorKind, SyncResult};
use crate::generation::GenerationPlan;
use crate::pipeline::{ProducerOutcome, RecordProducer};
use crate::reporter::StreamStatus;
use crate::sync_error;
use crate::test_utils::stream::raw_record;
use crate::types::{GenerationId, StreamConfig, StreamId};

#[derive(Debug, Default)]
struct Inner {
    pending: HashMap<StreamId, Vec<(Value, DateTime<Utc>)>>,
    statuses: HashMap<StreamId, StreamStatus>,
    failing: HashSet<StreamId>,
    panicking: HashSet<StreamId>,
    untracked: bool,
    produced_generations: HashMap<StreamId, Vec<GenerationId>>,
}

/// Record producer staging queued payloads into a [`MemoryDestination`].
///
/// Payloads queued for a stream are staged on its next run, tagged with the generation of
/// that run. Streams complete unless told otherwise.
#[derive(Debug, Clone)]
pub struct MemoryRecordProducer {
    destination: MemoryDestination,
    inner: Arc<Mutex<Inner>>,
}

impl MemoryRecordProducer {
    pub fn new(destination: MemoryDestination) -> Self {
        Self {
            destination,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Queues a payload extracted at `extracted_at` for the next run of `stream`.
    pub async fn push(&self, stream: &StreamId, payload: Value, extracted_at: DateTime<Utc>) {
        let mut inner = self.inner.lock().await;
        inner
            .pending
            .entry(stream.clone())
            .or_default()
            .push((payload, extracted_at));
    }

    pub async fn set_status(&self, stream: &StreamId, status: StreamStatus) {
        let mut inner = self.inner.lock().await;
        inner.statuses.insert(stream.clone(), status);
    }

    /// Makes production fail for `stream` with a non-transient error.
    pub async fn fail(&self, stream: &StreamId) {
        let mut inner = self.inner.lock().await;
        inner.failing.insert(stream.clone());
    }

    /// Makes production panic for `stream`.
    pub async fn panic_on(&self, stream: &StreamId) {
        let mut inner = self.inner.lock().await;
        inner.panicking.insert(stream.clone());
    }

    /// Stops reporting how many records were written.
    pub async fn untracked(&self) {
        let mut inner = self.inner.lock().await;
        inner.untracked = true;
    }

    /// Generations records were produced with for `stream`, one entry per run.
    pub async fn produced_generations(&self, stream: &StreamId) -> Vec<GenerationId> {
        let inner = self.inner.lock().await;
        inner
            .produced_generations
            .get(stream)
            .cloned()
            .unwrap_or_default()
    }
}

impl RecordProducer for MemoryRecordProducer {
    async fn produce(
        &self,
        stream: &StreamConfig,
        plan: &GenerationPlan,
    ) -> SyncResult<ProducerOutcome> {
        let (payloads, status, untracked) = {
            let mut inner = self.inner.lock().await;
            if inner.panicking.contains(&stream.id) {
                panic!("record producer panicked for stream {}", stream.id);
            }
            if inner.failing.contains(&stream.id) {
                return Err(sync_error!(
                    ErrorKind::InvalidData,
                    "Source failed to produce records",
                    format!("stream {}", stream.id)
                ));
            }

            inner
                .produced_generations
                .entry(stream.id.clone())
                .or_default()
                .push(plan.current_generation_id);

            let payloads = inner.pending.remove(&stream.id).unwrap_or_default();
            let status = inner
                .statuses
                .get(&stream.id)
                .copied()
                .unwrap_or(StreamStatus::Complete);

            (payloads, status, inner.untracked)
        };

        let records: Vec<_> = payloads
            .into_iter()
            .map(|(payload, extracted_at)| {
                raw_record(payload, extracted_at, plan.current_generation_id)
            })
            .collect();
        let written = records.len() as u64;

        if !records.is_empty() {
            self.destination.stage_raw_records(&stream.id, records).await;
        }

        Ok(ProducerOutcome {
            records_written: (!untracked).then_some(written),
            status,
        })
    }
}
