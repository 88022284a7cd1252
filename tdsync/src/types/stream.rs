use std::fmt;

use serde::{Deserialize, Serialize};

use crate::bail;
use crate::error::{ErrorKind, SyncResult};
use crate::types::LogicalType;

/// Maximum length, in bytes, of a warehouse identifier.
const MAX_IDENTIFIER_LENGTH: usize = 127;

/// Characters that no supported backend accepts in an identifier.
const FORBIDDEN_IDENTIFIER_CHARS: [char; 3] = ['\0', '`', '"'];

/// Prefix of the raw table name derived from the final table name.
const RAW_TABLE_PREFIX: &str = "raw__";

/// Identity of a replicated stream on both sides of the sync.
///
/// The original namespace and name are the ones declared by the source, the final and raw
/// identifiers are the ones used for the warehouse-side tables. Immutable for a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId {
    pub original_namespace: Option<String>,
    pub original_name: String,
    pub final_namespace: String,
    pub final_name: String,
    pub raw_namespace: String,
    pub raw_name: String,
}

impl StreamId {
    /// Creates a stream id whose raw table lives next to the final table as `raw__<final_name>`.
    pub fn new(
        original_namespace: Option<&str>,
        original_name: &str,
        final_namespace: &str,
        final_name: &str,
    ) -> Self {
        Self {
            original_namespace: original_namespace.map(str::to_owned),
            original_name: original_name.to_owned(),
            final_namespace: final_namespace.to_owned(),
            final_name: final_name.to_owned(),
            raw_namespace: final_namespace.to_owned(),
            raw_name: format!("{RAW_TABLE_PREFIX}{final_name}"),
        }
    }

    /// Overrides where the raw table of this stream lives.
    pub fn with_raw_table(mut self, raw_namespace: &str, raw_name: &str) -> Self {
        self.raw_namespace = raw_namespace.to_owned();
        self.raw_name = raw_name.to_owned();
        self
    }

    /// Checks that every warehouse-side identifier is usable.
    pub fn validate(&self) -> SyncResult<()> {
        validate_identifier("final namespace", &self.final_namespace)?;
        validate_identifier("final name", &self.final_name)?;
        validate_identifier("raw namespace", &self.raw_namespace)?;
        validate_identifier("raw name", &self.raw_name)?;

        Ok(())
    }
}

fn validate_identifier(what: &str, identifier: &str) -> SyncResult<()> {
    if identifier.trim().is_empty() {
        bail!(
            ErrorKind::InvalidStreamIdentifier,
            "Stream identifier is empty",
            format!("the {what} must not be empty")
        );
    }

    if identifier.len() > MAX_IDENTIFIER_LENGTH {
        bail!(
            ErrorKind::InvalidStreamIdentifier,
            "Stream identifier is too long",
            format!(
                "the {what} '{identifier}' is {} bytes long, the maximum is {MAX_IDENTIFIER_LENGTH}",
                identifier.len()
            )
        );
    }

    if let Some(c) = identifier
        .chars()
        .find(|c| FORBIDDEN_IDENTIFIER_CHARS.contains(c))
    {
        bail!(
            ErrorKind::InvalidStreamIdentifier,
            "Stream identifier contains a forbidden character",
            format!("the {what} '{identifier}' contains {c:?}")
        );
    }

    Ok(())
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.final_namespace, self.final_name)
    }
}

/// How raw records of a stream are materialized into its final table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Every raw record becomes one final row.
    Append,
    /// One final row per primary key, last writer wins.
    AppendDedup,
    /// Each run replaces the final table with the records of the newest generation.
    Overwrite,
}

/// A typed column of the final table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub logical_type: LogicalType,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, logical_type: LogicalType) -> Self {
        Self {
            name: name.into(),
            logical_type,
        }
    }
}

/// Configuration of a stream, read-only to the sync engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub id: StreamId,
    pub sync_mode: SyncMode,
    /// Ordered primary key columns, empty for append-only streams.
    pub primary_key: Vec<String>,
    pub cursor: Option<String>,
    pub columns: Vec<ColumnSchema>,
    /// Identifier of the sync producing this run, stamped into every final row.
    pub sync_id: i64,
}

impl StreamConfig {
    /// Returns `true` if final rows are deduplicated by primary key.
    pub fn is_dedup(&self) -> bool {
        self.sync_mode != SyncMode::Append && !self.primary_key.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }

    /// Returns the positions of the primary key columns in [`StreamConfig::columns`].
    pub fn primary_key_indices(&self) -> SyncResult<Vec<usize>> {
        self.primary_key
            .iter()
            .map(|name| self.required_column_index("primary key", name))
            .collect()
    }

    pub fn cursor_index(&self) -> SyncResult<Option<usize>> {
        self.cursor
            .as_deref()
            .map(|name| self.required_column_index("cursor", name))
            .transpose()
    }

    fn required_column_index(&self, role: &str, name: &str) -> SyncResult<usize> {
        match self.column_index(name) {
            Some(index) => Ok(index),
            None => bail!(
                ErrorKind::ConfigError,
                "Column is not declared in the stream schema",
                format!("{role} column '{name}' of stream {}", self.id)
            ),
        }
    }

    /// Validates identifiers, key columns and the sync mode.
    pub fn validate(&self) -> SyncResult<()> {
        self.id.validate()?;

        match (self.sync_mode, self.primary_key.is_empty()) {
            (SyncMode::Append, false) => bail!(
                ErrorKind::ConfigError,
                "Append streams cannot declare a primary key",
                format!("stream {}", self.id)
            ),
            (SyncMode::AppendDedup, true) => bail!(
                ErrorKind::ConfigError,
                "Deduplicated streams require a primary key",
                format!("stream {}", self.id)
            ),
            _ => {}
        }

        for (i, column) in self.columns.iter().enumerate() {
            if self.columns[..i].iter().any(|c| c.name == column.name) {
                bail!(
                    ErrorKind::ConfigError,
                    "Column is declared more than once",
                    format!("column '{}' of stream {}", column.name, self.id)
                );
            }
        }

        self.primary_key_indices()?;
        self.cursor_index()?;

        Ok(())
    }
}
