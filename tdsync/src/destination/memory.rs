use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::bail;
use crate::destination::{DestinationHandler, MergeStrategy, RawRecordQuery, Statement};
use crate::error::{ErrorKind, SyncResult};
use crate::migrations::{GenerationTrackingState, MetaColumnState};
use crate::state::DestinationState;
use crate::typing::{RowDeduplicator, append_into};
use crate::types::{
    ColumnSchema, DestinationInitialStatus, FinalRow, GenerationId, InitialRawTableStatus, Meta,
    RawRecord, StreamConfig, StreamId,
};

/// State persisted by [`MemoryDestination`] for each stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryDestinationState {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub needs_soft_reset: bool,
    #[serde(default)]
    pub meta_columns_migrated: bool,
    #[serde(default)]
    pub generation_tracking_migrated: bool,
}

impl DestinationState for MemoryDestinationState {
    const CURRENT_VERSION: u32 = 2;

    fn version(&self) -> u32 {
        self.version
    }

    fn needs_soft_reset(&self) -> bool {
        self.needs_soft_reset
    }

    fn with_soft_reset(self, needs_soft_reset: bool) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            needs_soft_reset,
            ..self
        }
    }
}

impl MetaColumnState for MemoryDestinationState {
    fn meta_columns_migrated(&self) -> bool {
        self.meta_columns_migrated
    }

    fn with_meta_columns_migrated(self) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            meta_columns_migrated: true,
            ..self
        }
    }
}

impl GenerationTrackingState for MemoryDestinationState {
    fn generation_tracking_migrated(&self) -> bool {
        self.generation_tracking_migrated
    }

    fn with_generation_tracking_migrated(self) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            generation_tracking_migrated: true,
            ..self
        }
    }
}

/// A raw table row as stored by [`MemoryDestination`].
///
/// Rows written before the meta or generation columns existed have `None` in those fields
/// until a migration adds and backfills them.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRawRecord {
    pub raw_id: Uuid,
    pub extracted_at: Option<DateTime<Utc>>,
    pub loaded_at: Option<DateTime<Utc>>,
    pub generation_id: Option<GenerationId>,
    pub data: Map<String, Value>,
    pub meta: Option<Meta>,
}

impl StoredRawRecord {
    /// A row of a raw table predating generation tracking and the meta column.
    pub fn legacy(data: Map<String, Value>, extracted_at: Option<DateTime<Utc>>) -> Self {
        Self {
            raw_id: Uuid::new_v4(),
            extracted_at,
            loaded_at: None,
            generation_id: None,
            data,
            meta: None,
        }
    }

    fn into_raw_record(self, stream: &StreamId) -> SyncResult<RawRecord> {
        let (Some(extracted_at), Some(generation_id)) = (self.extracted_at, self.generation_id)
        else {
            bail!(
                ErrorKind::InvalidState,
                "Raw record has not been backfilled",
                format!("record {} of stream {stream}", self.raw_id)
            );
        };

        Ok(RawRecord {
            raw_id: self.raw_id,
            extracted_at,
            loaded_at: self.loaded_at,
            generation_id,
            data: self.data,
            meta: self.meta.unwrap_or_default(),
        })
    }
}

impl From<RawRecord> for StoredRawRecord {
    fn from(record: RawRecord) -> Self {
        Self {
            raw_id: record.raw_id,
            extracted_at: Some(record.extracted_at),
            loaded_at: record.loaded_at,
            generation_id: Some(record.generation_id),
            data: record.data,
            meta: Some(record.meta),
        }
    }
}

#[derive(Debug, Default)]
struct RawTable {
    has_meta_column: bool,
    has_generation_column: bool,
    records: Vec<StoredRawRecord>,
}

#[derive(Debug)]
struct FinalTable {
    columns: Vec<ColumnSchema>,
    has_meta_column: bool,
    has_generation_column: bool,
    rows: Vec<FinalRow>,
}

#[derive(Debug, Default)]
struct Inner {
    raw_tables: HashMap<StreamId, RawTable>,
    final_tables: HashMap<StreamId, FinalTable>,
    staging_tables: HashMap<StreamId, Vec<FinalRow>>,
    states: HashMap<StreamId, Value>,
    generations: HashMap<StreamId, GenerationId>,
}

impl Inner {
    fn raw_table_mut(&mut self, stream: &StreamId) -> SyncResult<&mut RawTable> {
        match self.raw_tables.get_mut(stream) {
            Some(table) => Ok(table),
            None => bail!(
                ErrorKind::InvalidState,
                "Raw table does not exist",
                format!("stream {stream}")
            ),
        }
    }

    fn final_table_mut(&mut self, stream: &StreamId) -> SyncResult<&mut FinalTable> {
        match self.final_tables.get_mut(stream) {
            Some(table) => Ok(table),
            None => bail!(
                ErrorKind::InvalidState,
                "Final table does not exist",
                format!("stream {stream}")
            ),
        }
    }

    fn staging_table(&self, stream: &StreamId) -> SyncResult<&Vec<FinalRow>> {
        match self.staging_tables.get(stream) {
            Some(rows) => Ok(rows),
            None => bail!(
                ErrorKind::InvalidState,
                "Staging table does not exist",
                format!("stream {stream}")
            ),
        }
    }

    fn probe(&self, config: &StreamConfig) -> SyncResult<DestinationInitialStatus<MemoryDestinationState>> {
        let stream = &config.id;

        let raw_table = self.raw_tables.get(stream);
        let final_table = self.final_tables.get(stream);

        let raw_status = match raw_table {
            Some(table) => InitialRawTableStatus {
                raw_table_exists: true,
                has_unprocessed_records: table.records.iter().any(|r| r.loaded_at.is_none()),
                max_processed_timestamp: table
                    .records
                    .iter()
                    .filter(|r| r.loaded_at.is_some())
                    .filter_map(|r| r.extracted_at)
                    .max(),
            },
            None => InitialRawTableStatus::default(),
        };

        let initial_generation_id = [
            self.generations.get(stream).copied(),
            raw_table.and_then(|t| t.records.iter().filter_map(|r| r.generation_id).max()),
            final_table.and_then(|t| t.rows.iter().map(|r| r.generation_id).max()),
        ]
        .into_iter()
        .flatten()
        .max()
        .unwrap_or(0);

        Ok(DestinationInitialStatus {
            raw_table: raw_status,
            final_table_exists: final_table.is_some(),
            final_table_schema_matches: final_table.is_some_and(|t| {
                t.columns == config.columns && t.has_meta_column && t.has_generation_column
            }),
            final_table_empty: final_table.is_none_or(|t| t.rows.is_empty()),
            initial_generation_id,
            destination_state: MemoryDestinationState::decode(self.states.get(stream))?,
        })
    }

    fn execute(&mut self, statement: Statement) -> SyncResult<u64> {
        let affected = match statement {
            Statement::CreateFinalTable {
                stream,
                columns,
                replace,
            } => {
                if !replace && self.final_tables.contains_key(&stream) {
                    0
                } else {
                    let table = FinalTable {
                        columns,
                        has_meta_column: true,
                        has_generation_column: true,
                        rows: Vec::new(),
                    };
                    self.final_tables.insert(stream, table);
                    1
                }
            }
            Statement::AddMetaColumns { stream } => {
                let mut altered = 0;
                if let Some(table) = self.raw_tables.get_mut(&stream)
                    && !table.has_meta_column
                {
                    table.has_meta_column = true;
                    for record in &mut table.records {
                        record.meta.get_or_insert_with(Meta::default);
                    }
                    altered += 1;
                }
                if let Some(table) = self.final_tables.get_mut(&stream)
                    && !table.has_meta_column
                {
                    table.has_meta_column = true;
                    altered += 1;
                }
                altered
            }
            Statement::AddGenerationIdColumns { stream } => {
                let mut altered = 0;
                if let Some(table) = self.raw_tables.get_mut(&stream)
                    && !table.has_generation_column
                {
                    table.has_generation_column = true;
                    altered += 1;
                }
                if let Some(table) = self.final_tables.get_mut(&stream)
                    && !table.has_generation_column
                {
                    table.has_generation_column = true;
                    altered += 1;
                }
                altered
            }
            Statement::BackfillGenerationIds {
                stream,
                generation_id,
            } => {
                let table = self.raw_table_mut(&stream)?;
                if !table.has_generation_column {
                    bail!(
                        ErrorKind::InvalidState,
                        "Raw table has no generation column to backfill",
                        format!("stream {stream}")
                    );
                }

                let earliest = table
                    .records
                    .iter()
                    .filter_map(|r| r.extracted_at)
                    .min()
                    .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

                let mut updated = 0;
                for record in &mut table.records {
                    if record.generation_id.is_none() || record.extracted_at.is_none() {
                        record.generation_id.get_or_insert(generation_id);
                        record.extracted_at.get_or_insert(earliest);
                        updated += 1;
                    }
                }
                updated
            }
            Statement::AdvanceGeneration {
                stream,
                generation_id,
            } => {
                let high_water = self.generations.entry(stream).or_default();
                *high_water = (*high_water).max(generation_id);
                1
            }
            Statement::DeleteRawRecordsBelowGeneration {
                stream,
                generation_id,
            } => {
                let table = self.raw_table_mut(&stream)?;
                let before = table.records.len();
                table
                    .records
                    .retain(|r| r.generation_id.unwrap_or(0) >= generation_id);
                (before - table.records.len()) as u64
            }
            Statement::ResetLoadedAt {
                stream,
                min_generation,
            } => {
                let table = self.raw_table_mut(&stream)?;
                let mut updated = 0;
                for record in &mut table.records {
                    if record.generation_id.unwrap_or(0) >= min_generation
                        && record.loaded_at.take().is_some()
                    {
                        updated += 1;
                    }
                }
                updated
            }
            Statement::CreateStagingTable { stream } => {
                self.staging_tables.insert(stream, Vec::new());
                1
            }
            Statement::InsertStagingRows { stream, rows } => {
                if !self.staging_tables.contains_key(&stream) {
                    bail!(
                        ErrorKind::InvalidState,
                        "Staging table does not exist",
                        format!("stream {stream}")
                    );
                }
                let inserted = rows.len() as u64;
                self.staging_tables.entry(stream).or_default().extend(rows);
                inserted
            }
            Statement::MergeStagingIntoFinal { stream, strategy } => {
                let staged = self.staging_table(&stream)?.clone();
                let table = self.final_table_mut(&stream)?;
                match strategy {
                    MergeStrategy::Append => append_into(&mut table.rows, staged),
                    MergeStrategy::Dedup { cursor, .. } => {
                        RowDeduplicator::new(cursor).merge_into(&mut table.rows, staged)
                    }
                }
            }
            Statement::DropStagingTable { stream } => {
                u64::from(self.staging_tables.remove(&stream).is_some())
            }
            Statement::MarkRawRecordsLoaded {
                stream,
                raw_ids,
                loaded_at,
            } => {
                let raw_ids: HashSet<Uuid> = raw_ids.into_iter().collect();
                let table = self.raw_table_mut(&stream)?;
                let mut updated = 0;
                for record in &mut table.records {
                    if raw_ids.contains(&record.raw_id) {
                        record.loaded_at = Some(loaded_at);
                        updated += 1;
                    }
                }
                updated
            }
        };

        Ok(affected)
    }

    fn fetch_raw_records(&self, query: &RawRecordQuery) -> SyncResult<Vec<RawRecord>> {
        let Some(table) = self.raw_tables.get(&query.stream) else {
            return Ok(Vec::new());
        };

        if !table.has_generation_column {
            bail!(
                ErrorKind::InvalidState,
                "Raw table is missing generation tracking",
                format!("stream {}", query.stream)
            );
        }

        let mut matching: Vec<&StoredRawRecord> = table
            .records
            .iter()
            .filter(|r| r.generation_id.unwrap_or(0) >= query.min_generation)
            .filter(|r| {
                r.loaded_at.is_none()
                    || matches!(
                        (r.extracted_at, query.extracted_after),
                        (Some(extracted_at), Some(after)) if extracted_at > after
                    )
            })
            .collect();
        // Stable, so records extracted at the same instant keep their arrival order.
        matching.sort_by_key(|r| r.extracted_at);

        matching
            .into_iter()
            .take(query.limit)
            .map(|r| r.clone().into_raw_record(&query.stream))
            .collect()
    }
}

/// In-memory warehouse backend.
///
/// Keeps raw, final and staging tables plus the persisted state of every stream behind a
/// single lock, so each [`Statement`] is applied atomically.
#[derive(Debug, Clone, Default)]
pub struct MemoryDestination {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Durably stages raw records for `stream`, creating the raw table if needed.
    pub async fn stage_raw_records(&self, stream: &StreamId, records: Vec<RawRecord>) {
        let mut inner = self.inner.lock().await;
        let table = inner
            .raw_tables
            .entry(stream.clone())
            .or_insert_with(|| RawTable {
                has_meta_column: true,
                has_generation_column: true,
                records: Vec::new(),
            });

        debug!(%stream, count = records.len(), "staging raw records");
        table
            .records
            .extend(records.into_iter().map(StoredRawRecord::from));
    }

    /// Installs a raw table written before the meta and generation columns existed.
    pub async fn install_legacy_raw_table(&self, stream: &StreamId, records: Vec<StoredRawRecord>) {
        let mut inner = self.inner.lock().await;
        let table = RawTable {
            has_meta_column: false,
            has_generation_column: false,
            records,
        };
        inner.raw_tables.insert(stream.clone(), table);
    }

    /// Installs a final table written before the meta and generation columns existed.
    pub async fn install_legacy_final_table(
        &self,
        stream: &StreamId,
        columns: Vec<ColumnSchema>,
        rows: Vec<FinalRow>,
    ) {
        let mut inner = self.inner.lock().await;
        let table = FinalTable {
            columns,
            has_meta_column: false,
            has_generation_column: false,
            rows,
        };
        inner.final_tables.insert(stream.clone(), table);
    }

    pub async fn raw_records(&self, stream: &StreamId) -> Vec<StoredRawRecord> {
        let inner = self.inner.lock().await;
        inner
            .raw_tables
            .get(stream)
            .map(|table| table.records.clone())
            .unwrap_or_default()
    }

    /// Returns the final rows of `stream`, or `None` if its final table does not exist.
    pub async fn final_rows(&self, stream: &StreamId) -> Option<Vec<FinalRow>> {
        let inner = self.inner.lock().await;
        inner.final_tables.get(stream).map(|table| table.rows.clone())
    }

    pub async fn staging_table_exists(&self, stream: &StreamId) -> bool {
        let inner = self.inner.lock().await;
        inner.staging_tables.contains_key(stream)
    }

    pub async fn state(&self, stream: &StreamId) -> SyncResult<MemoryDestinationState> {
        let inner = self.inner.lock().await;
        MemoryDestinationState::decode(inner.states.get(stream))
    }

    pub async fn generation_high_water(&self, stream: &StreamId) -> Option<GenerationId> {
        let inner = self.inner.lock().await;
        inner.generations.get(stream).copied()
    }
}

impl DestinationHandler for MemoryDestination {
    type State = MemoryDestinationState;

    fn name() -> &'static str {
        "memory"
    }

    async fn probe(
        &self,
        stream: &StreamConfig,
    ) -> SyncResult<DestinationInitialStatus<Self::State>> {
        let inner = self.inner.lock().await;
        inner.probe(stream)
    }

    async fn execute(&self, statement: Statement) -> SyncResult<u64> {
        let mut inner = self.inner.lock().await;
        let name = statement.name();
        let stream = statement.stream().clone();
        let affected = inner.execute(statement)?;
        debug!(%stream, statement = name, affected, "executed statement");

        Ok(affected)
    }

    async fn fetch_raw_records(&self, query: RawRecordQuery) -> SyncResult<Vec<RawRecord>> {
        let inner = self.inner.lock().await;
        inner.fetch_raw_records(&query)
    }

    async fn commit_state(&self, stream: &StreamId, state: &Self::State) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;
        let encoded = state.encode()?;
        info!(%stream, ?state, "committing destination state");
        inner.states.insert(stream.clone(), encoded);

        Ok(())
    }
}
