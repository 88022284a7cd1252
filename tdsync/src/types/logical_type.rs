use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bail;
use crate::error::{ErrorKind, SyncResult};

/// Logical type of a final table column, independent of any warehouse dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalType {
    String,
    Boolean,
    Integer,
    Number,
    Date,
    TimestampWithTimezone,
    TimestampWithoutTimezone,
    TimeWithTimezone,
    TimeWithoutTimezone,
    Object,
    Array,
    /// Unions and schemaless columns, kept as raw JSON.
    Unknown,
}

impl LogicalType {
    /// Derives the logical type of a column from its JSON schema declaration.
    ///
    /// Nullable declarations such as `["null", "string"]` resolve to the non-null type,
    /// unions of several non-null types and `oneOf`/`anyOf` schemas resolve to
    /// [`LogicalType::Unknown`].
    pub fn from_json_schema(schema: &Value) -> SyncResult<LogicalType> {
        let Value::Object(schema) = schema else {
            bail!(
                ErrorKind::UnsupportedType,
                "Column schema must be a JSON object",
                schema
            );
        };

        if schema.contains_key("oneOf") || schema.contains_key("anyOf") {
            return Ok(LogicalType::Unknown);
        }

        let declared = match schema.get("type") {
            Some(Value::String(name)) => vec![name.as_str()],
            Some(Value::Array(names)) => {
                let mut declared = Vec::with_capacity(names.len());
                for name in names {
                    match name.as_str() {
                        Some("null") => {}
                        Some(name) => declared.push(name),
                        None => bail!(
                            ErrorKind::UnsupportedType,
                            "Column type names must be strings",
                            name
                        ),
                    }
                }
                declared
            }
            Some(other) => bail!(
                ErrorKind::UnsupportedType,
                "Column type must be a string or an array of strings",
                other
            ),
            None if schema.contains_key("properties") => return Ok(LogicalType::Object),
            None if schema.contains_key("items") => return Ok(LogicalType::Array),
            None => return Ok(LogicalType::Unknown),
        };

        let [name] = declared.as_slice() else {
            return Ok(LogicalType::Unknown);
        };

        let format = schema.get("format").and_then(Value::as_str);
        let airbyte_type = schema.get("airbyte_type").and_then(Value::as_str);

        let logical_type = match *name {
            "string" => match (format, airbyte_type) {
                (Some("date"), _) => LogicalType::Date,
                (Some("date-time"), Some("timestamp_without_timezone")) => {
                    LogicalType::TimestampWithoutTimezone
                }
                (Some("date-time"), _) => LogicalType::TimestampWithTimezone,
                (Some("time"), Some("time_without_timezone")) => LogicalType::TimeWithoutTimezone,
                (Some("time"), _) => LogicalType::TimeWithTimezone,
                _ => LogicalType::String,
            },
            "integer" => LogicalType::Integer,
            "number" if airbyte_type == Some("integer") => LogicalType::Integer,
            "number" => LogicalType::Number,
            "boolean" => LogicalType::Boolean,
            "object" => LogicalType::Object,
            "array" => LogicalType::Array,
            other => bail!(
                ErrorKind::UnsupportedType,
                "Column type is not supported",
                other
            ),
        };

        Ok(logical_type)
    }
}
