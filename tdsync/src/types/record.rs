use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::types::{Cell, GenerationId, StreamConfig};

/// What happened to a field while it was carried to the final table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    Nulled,
    Truncated,
}

/// Why a field was changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeReason {
    DestinationTypecastError,
    DestinationFieldSizeLimitation,
    SourceFieldSizeLimitation,
    SourceRecordSizeLimitation,
    SourceSerializationError,
    SourceRetrievalError,
}

/// A single change applied to a field of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub field: String,
    pub change: ChangeKind,
    pub reason: ChangeReason,
}

impl Change {
    /// A column nulled because its raw value could not be coerced to the declared type.
    pub fn typecast_error(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            change: ChangeKind::Nulled,
            reason: ChangeReason::DestinationTypecastError,
        }
    }
}

/// Content of the meta column of raw and final rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_id: Option<i64>,
    #[serde(default)]
    pub changes: Vec<Change>,
}

impl Meta {
    /// Number of columns nulled by the destination while typing the row.
    pub fn typing_failures(&self) -> usize {
        self.changes
            .iter()
            .filter(|change| change.reason == ChangeReason::DestinationTypecastError)
            .count()
    }
}

/// A record as staged in the raw table, before typing and deduplication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub raw_id: Uuid,
    pub extracted_at: DateTime<Utc>,
    /// `None` until the record has been materialized into the final table.
    pub loaded_at: Option<DateTime<Utc>>,
    pub generation_id: GenerationId,
    pub data: Map<String, Value>,
    /// Changes reported by the source for this record.
    #[serde(default)]
    pub meta: Meta,
}

impl RawRecord {
    pub fn new(data: Map<String, Value>, extracted_at: DateTime<Utc>, generation_id: GenerationId) -> Self {
        Self {
            raw_id: Uuid::new_v4(),
            extracted_at,
            loaded_at: None,
            generation_id,
            data,
            meta: Meta::default(),
        }
    }

    /// Returns the raw value of `column`, treating JSON null as absent.
    pub fn value(&self, column: &str) -> Option<&Value> {
        self.data.get(column).filter(|value| !value.is_null())
    }

    /// Raw values of the primary key columns, in key order.
    pub fn primary_key_values<'a>(&'a self, config: &StreamConfig) -> Vec<Option<&'a Value>> {
        config
            .primary_key
            .iter()
            .map(|column| self.value(column))
            .collect()
    }

    pub fn cursor_value<'a>(&'a self, config: &StreamConfig) -> Option<&'a Value> {
        config.cursor.as_deref().and_then(|column| self.value(column))
    }

    pub fn is_processed(&self) -> bool {
        self.loaded_at.is_some()
    }
}

/// One component of the identity of a final row.
///
/// A value that failed typing is nulled in the final table but keeps its own identity, so
/// two records whose keys cannot be typed are never merged into one row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPart {
    /// Missing or JSON null.
    Null,
    /// Canonical text of the typed cell.
    Typed(String),
    /// JSON text of a value that could not be typed.
    Untyped(String),
}

impl KeyPart {
    /// Builds the key part of a raw value given the cell it was typed into.
    pub fn of(raw: Option<&Value>, cell: &Cell) -> Self {
        let Some(raw) = raw else {
            return Self::Null;
        };

        match cell.key_text() {
            Some(text) => Self::Typed(text),
            None => Self::Untyped(raw.to_string()),
        }
    }
}

/// A typed row of the final table.
///
/// `values` follow the order of [`StreamConfig::columns`] and `primary_key` the order of
/// [`StreamConfig::primary_key`].
#[derive(Debug, Clone, PartialEq)]
pub struct FinalRow {
    pub raw_id: Uuid,
    pub extracted_at: DateTime<Utc>,
    pub generation_id: GenerationId,
    pub values: Vec<Cell>,
    pub primary_key: Vec<KeyPart>,
    pub meta: Meta,
}
