use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use tdsync_config::shared::SyncConfig;
use tracing::{debug, info};

use crate::concurrency::retry::with_retries;
use crate::concurrency::shutdown::ShutdownRx;
use crate::destination::{DestinationHandler, MergeStrategy, RawRecordQuery, Statement};
use crate::error::SyncResult;
use crate::generation::GenerationPlan;
use crate::metrics::{
    DESTINATION, TDSYNC_MERGE_DURATION_SECONDS, TDSYNC_RECORDS_APPLIED_TOTAL,
    TDSYNC_TYPING_FAILURES_TOTAL,
};
use crate::typing::{RowDeduplicator, type_record};
use crate::types::{DestinationInitialStatus, FinalRow, StreamConfig};

/// Result of materializing the pending raw records of a stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Raw records read and typed.
    pub records_applied: u64,
    /// Final rows inserted or replaced by the merges.
    pub rows_merged: u64,
    /// Columns nulled because their value could not be typed.
    pub typing_failures: u64,
    /// Merge steps committed.
    pub batches: u64,
    /// Greatest extraction time among materialized raw records.
    pub max_processed_timestamp: Option<DateTime<Utc>>,
}

/// Materializes raw records into the final table of a stream.
///
/// Pending raw records are consumed in batches, in extraction order. Each batch is typed,
/// reduced to one row per primary key for deduplicated streams, written to a staging table
/// and merged into the final table in a single statement. Raw records are marked loaded only
/// after their merge committed, so a run interrupted at any point can be resumed by merging
/// the same records again.
#[derive(Debug, Clone)]
pub struct Applier<D> {
    config: Arc<SyncConfig>,
    destination: D,
}

impl<D> Applier<D>
where
    D: DestinationHandler + Clone + Send + Sync + 'static,
{
    pub fn new(config: Arc<SyncConfig>, destination: D) -> Self {
        Self {
            config,
            destination,
        }
    }

    pub async fn apply(
        &self,
        stream: &StreamConfig,
        plan: &GenerationPlan,
        status: &DestinationInitialStatus<D::State>,
        shutdown: &ShutdownRx,
    ) -> SyncResult<ApplyOutcome> {
        let (strategy, deduplicator) = if stream.is_dedup() {
            let primary_key = stream.primary_key_indices()?;
            let cursor = stream.cursor_index()?;
            let deduplicator = RowDeduplicator::new(cursor);
            (
                MergeStrategy::Dedup {
                    primary_key,
                    cursor,
                },
                Some(deduplicator),
            )
        } else {
            (MergeStrategy::Append, None)
        };

        // Records already loaded but extracted after this point are merged again. After a
        // rebuild every retained record is unprocessed, so nothing needs to be revisited.
        let mut extracted_after = if plan.bumped || plan.rebuild_final_table {
            None
        } else {
            status.raw_table.max_processed_timestamp
        };

        let mut outcome = ApplyOutcome {
            max_processed_timestamp: status.raw_table.max_processed_timestamp,
            ..ApplyOutcome::default()
        };

        loop {
            shutdown.check("merge step")?;

            let query = RawRecordQuery {
                stream: stream.id.clone(),
                min_generation: plan.minimum_generation_id_to_retain,
                extracted_after,
                limit: self.config.apply_batch_size,
            };
            let records = self
                .retrying("fetch_raw_records", || {
                    self.destination.fetch_raw_records(query.clone())
                })
                .await?;

            let Some(batch_max) = records.iter().map(|r| r.extracted_at).max() else {
                break;
            };

            let raw_ids = records.iter().map(|r| r.raw_id).collect::<Vec<_>>();
            let typed: Vec<FinalRow> = records
                .iter()
                .map(|record| type_record(stream, record))
                .collect();
            let typing_failures: u64 = typed
                .iter()
                .map(|row| row.meta.typing_failures() as u64)
                .sum();
            let rows = match &deduplicator {
                Some(deduplicator) => deduplicator.deduplicate(typed),
                None => typed,
            };

            let started = Instant::now();
            let rows_merged = self.merge_batch(stream, rows, &strategy).await?;
            histogram!(TDSYNC_MERGE_DURATION_SECONDS, DESTINATION => D::name())
                .record(started.elapsed().as_secs_f64());

            let records_applied = raw_ids.len() as u64;
            self.execute(Statement::MarkRawRecordsLoaded {
                stream: stream.id.clone(),
                raw_ids,
                loaded_at: Utc::now(),
            })
            .await?;

            counter!(TDSYNC_RECORDS_APPLIED_TOTAL, DESTINATION => D::name())
                .increment(records_applied);
            if typing_failures > 0 {
                counter!(TDSYNC_TYPING_FAILURES_TOTAL, DESTINATION => D::name())
                    .increment(typing_failures);
            }

            outcome.records_applied += records_applied;
            outcome.rows_merged += rows_merged;
            outcome.typing_failures += typing_failures;
            outcome.batches += 1;
            outcome.max_processed_timestamp = outcome.max_processed_timestamp.max(Some(batch_max));
            extracted_after = extracted_after.max(Some(batch_max));

            debug!(
                stream = %stream.id,
                records_applied,
                rows_merged,
                typing_failures,
                "merged batch"
            );
        }

        info!(
            stream = %stream.id,
            records_applied = outcome.records_applied,
            rows_merged = outcome.rows_merged,
            typing_failures = outcome.typing_failures,
            batches = outcome.batches,
            "materialized raw records"
        );

        Ok(outcome)
    }

    async fn merge_batch(
        &self,
        stream: &StreamConfig,
        rows: Vec<FinalRow>,
        strategy: &MergeStrategy,
    ) -> SyncResult<u64> {
        let id = &stream.id;

        self.execute(Statement::CreateStagingTable { stream: id.clone() })
            .await?;
        self.execute(Statement::InsertStagingRows {
            stream: id.clone(),
            rows,
        })
        .await?;
        let merged = self
            .execute(Statement::MergeStagingIntoFinal {
                stream: id.clone(),
                strategy: strategy.clone(),
            })
            .await?;
        self.execute(Statement::DropStagingTable { stream: id.clone() })
            .await?;

        Ok(merged)
    }

    async fn execute(&self, statement: Statement) -> SyncResult<u64> {
        let name = statement.name();
        self.retrying(name, || self.destination.execute(statement.clone()))
            .await
    }

    async fn retrying<T, F, Fut>(&self, name: &'static str, operation: F) -> SyncResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        with_retries(
            &self.config.retry,
            self.config.operation_timeout(),
            name,
            operation,
        )
        .await
    }
}
