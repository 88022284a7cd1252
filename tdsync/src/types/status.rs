use chrono::{DateTime, Utc};

use crate::types::GenerationId;

/// State of the raw table of a stream at the start of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitialRawTableStatus {
    pub raw_table_exists: bool,
    /// Whether the raw table holds records not yet materialized into the final table.
    pub has_unprocessed_records: bool,
    /// Greatest extraction time among records already materialized.
    pub max_processed_timestamp: Option<DateTime<Utc>>,
}

/// Snapshot of the warehouse-side artifacts of a stream.
///
/// Produced by probing at the start of every run and superseded by a new probe whenever a
/// migration changes the shape of the tables. Never mutated in place.
#[derive(Debug, Clone, PartialEq)]
pub struct DestinationInitialStatus<S> {
    pub raw_table: InitialRawTableStatus,
    pub final_table_exists: bool,
    /// Whether the final table columns match the configured stream schema.
    pub final_table_schema_matches: bool,
    pub final_table_empty: bool,
    /// Greatest generation id already known by the destination for this stream.
    pub initial_generation_id: GenerationId,
    /// State persisted by the previous run.
    pub destination_state: S,
}

impl<S> DestinationInitialStatus<S> {
    /// Returns the same snapshot carrying `state` instead of the persisted one.
    pub fn with_state(self, state: S) -> Self {
        Self {
            destination_state: state,
            ..self
        }
    }

    pub fn raw_table_exists(&self) -> bool {
        self.raw_table.raw_table_exists
    }
}
