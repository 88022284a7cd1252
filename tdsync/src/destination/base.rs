use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::SyncResult;
use crate::state::DestinationState;
use crate::types::{
    ColumnSchema, DestinationInitialStatus, FinalRow, GenerationId, RawRecord, StreamConfig,
    StreamId,
};

/// How staged rows are merged into the final table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Insert every staged row whose raw id is not already present.
    Append,
    /// Upsert by primary key, replacing an existing row only when the staged row is not older
    /// according to its `(cursor, extracted_at)` ordering key.
    ///
    /// Rows are matched on [`FinalRow::primary_key`], which also tells apart keys that failed
    /// typing and were nulled in the row values.
    Dedup {
        /// Positions of the primary key columns.
        primary_key: Vec<usize>,
        /// Position of the cursor column, if the stream has one.
        cursor: Option<usize>,
    },
}

/// A warehouse primitive executed by a [`DestinationHandler`].
///
/// Each variant is the dialect-independent equivalent of one DDL or DML statement. Every
/// statement must be atomic from the point of view of the table it changes.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Creates the final table, dropping an existing one when `replace` is set.
    CreateFinalTable {
        stream: StreamId,
        columns: Vec<ColumnSchema>,
        replace: bool,
    },
    /// Adds the meta column to the raw and final tables where it is missing.
    ///
    /// Affected rows are the number of tables altered.
    AddMetaColumns { stream: StreamId },
    /// Adds generation tracking columns to the raw and final tables where they are missing.
    ///
    /// Affected rows are the number of tables altered.
    AddGenerationIdColumns { stream: StreamId },
    /// Assigns `generation_id` to rows written before generation tracking existed, and the
    /// earliest known extraction time to raw rows that have none.
    BackfillGenerationIds {
        stream: StreamId,
        generation_id: GenerationId,
    },
    /// Durably records `generation_id` as the newest generation of the stream.
    AdvanceGeneration {
        stream: StreamId,
        generation_id: GenerationId,
    },
    DeleteRawRecordsBelowGeneration {
        stream: StreamId,
        generation_id: GenerationId,
    },
    /// Marks every raw record at or above `min_generation` as not yet materialized.
    ResetLoadedAt {
        stream: StreamId,
        min_generation: GenerationId,
    },
    /// Creates an empty staging table, replacing any leftover from an interrupted run.
    CreateStagingTable { stream: StreamId },
    InsertStagingRows { stream: StreamId, rows: Vec<FinalRow> },
    /// Merges the staging table into the final table in a single commit.
    MergeStagingIntoFinal {
        stream: StreamId,
        strategy: MergeStrategy,
    },
    DropStagingTable { stream: StreamId },
    MarkRawRecordsLoaded {
        stream: StreamId,
        raw_ids: Vec<Uuid>,
        loaded_at: DateTime<Utc>,
    },
}

impl Statement {
    pub fn stream(&self) -> &StreamId {
        match self {
            Statement::CreateFinalTable { stream, .. }
            | Statement::AddMetaColumns { stream }
            | Statement::AddGenerationIdColumns { stream }
            | Statement::BackfillGenerationIds { stream, .. }
            | Statement::AdvanceGeneration { stream, .. }
            | Statement::DeleteRawRecordsBelowGeneration { stream, .. }
            | Statement::ResetLoadedAt { stream, .. }
            | Statement::CreateStagingTable { stream }
            | Statement::InsertStagingRows { stream, .. }
            | Statement::MergeStagingIntoFinal { stream, .. }
            | Statement::DropStagingTable { stream }
            | Statement::MarkRawRecordsLoaded { stream, .. } => stream,
        }
    }

    /// Short name of the statement, used in logs and by test doubles.
    pub fn name(&self) -> &'static str {
        match self {
            Statement::CreateFinalTable { .. } => "create_final_table",
            Statement::AddMetaColumns { .. } => "add_meta_columns",
            Statement::AddGenerationIdColumns { .. } => "add_generation_id_columns",
            Statement::BackfillGenerationIds { .. } => "backfill_generation_ids",
            Statement::AdvanceGeneration { .. } => "advance_generation",
            Statement::DeleteRawRecordsBelowGeneration { .. } => {
                "delete_raw_records_below_generation"
            }
            Statement::ResetLoadedAt { .. } => "reset_loaded_at",
            Statement::CreateStagingTable { .. } => "create_staging_table",
            Statement::InsertStagingRows { .. } => "insert_staging_rows",
            Statement::MergeStagingIntoFinal { .. } => "merge_staging_into_final",
            Statement::DropStagingTable { .. } => "drop_staging_table",
            Statement::MarkRawRecordsLoaded { .. } => "mark_raw_records_loaded",
        }
    }
}

/// Selection of raw records to materialize.
///
/// Matches records with `generation_id >= min_generation` that are either not loaded yet or
/// were extracted after `extracted_after`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecordQuery {
    pub stream: StreamId,
    pub min_generation: GenerationId,
    pub extracted_after: Option<DateTime<Utc>>,
    pub limit: usize,
}

/// Interface to a warehouse backend.
///
/// Implementations must be safe to call concurrently for different streams. Transient
/// failures (connectivity, timeouts, expired credentials) must be reported with a transient
/// [`crate::error::ErrorKind`] so that callers can retry them.
pub trait DestinationHandler {
    /// Backend-specific state persisted between runs.
    type State: DestinationState;

    /// Returns the name of the destination.
    fn name() -> &'static str;

    /// Inspects the raw and final tables of `stream` without mutating them.
    fn probe(
        &self,
        stream: &StreamConfig,
    ) -> impl Future<Output = SyncResult<DestinationInitialStatus<Self::State>>> + Send;

    /// Executes a statement and returns the number of affected rows.
    fn execute(&self, statement: Statement) -> impl Future<Output = SyncResult<u64>> + Send;

    /// Reads matching raw records ordered by extraction time, ties in arrival order.
    fn fetch_raw_records(
        &self,
        query: RawRecordQuery,
    ) -> impl Future<Output = SyncResult<Vec<RawRecord>>> + Send;

    /// Atomically replaces the persisted state of `stream`.
    fn commit_state(
        &self,
        stream: &StreamId,
        state: &Self::State,
    ) -> impl Future<Output = SyncResult<()>> + Send;
}
