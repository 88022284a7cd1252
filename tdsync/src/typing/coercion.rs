use std::str::FromStr;

use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value;

use crate::types::{Cell, Change, FinalRow, KeyPart, LogicalType, Meta, RawRecord, StreamConfig};

/// Largest decimal exponent accepted for numbers, in either direction. Comparing or printing
/// a decimal costs time proportional to its exponent.
const MAX_DECIMAL_EXPONENT: i64 = 1_000;
/// An integral decimal with more trailing zeros than this does not fit an `i64`.
const MAX_I64_TRAILING_ZEROS: i64 = 18;

const NAIVE_TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];
const NAIVE_TIME_FORMATS: [&str; 2] = ["%H:%M:%S%.f", "%H:%M"];

/// Coerces a raw JSON value to `logical_type`.
///
/// Returns `None` if the value does not fit the type. JSON null maps to [`Cell::Null`] for
/// every type.
pub fn coerce(value: &Value, logical_type: LogicalType) -> Option<Cell> {
    if value.is_null() {
        return Some(Cell::Null);
    }

    match logical_type {
        LogicalType::String => Some(Cell::String(match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })),
        LogicalType::Boolean => match value {
            Value::Bool(b) => Some(Cell::Bool(*b)),
            Value::String(s) if s == "true" => Some(Cell::Bool(true)),
            Value::String(s) if s == "false" => Some(Cell::Bool(false)),
            _ => None,
        },
        LogicalType::Integer => {
            let decimal = decimal(value)?;
            let (_, scale) = decimal.as_bigint_and_exponent();
            if !(-MAX_I64_TRAILING_ZEROS..=0).contains(&scale) {
                return None;
            }
            decimal.to_i64().map(Cell::I64)
        }
        LogicalType::Number => decimal(value).map(Cell::Numeric),
        LogicalType::Date => {
            NaiveDate::parse_from_str(value.as_str()?, "%Y-%m-%d").ok().map(Cell::Date)
        }
        LogicalType::TimestampWithTimezone => {
            let text = value.as_str()?;
            match DateTime::parse_from_rfc3339(text) {
                Ok(timestamp) => Some(Cell::TimeStampTz(timestamp.with_timezone(&Utc))),
                Err(_) => naive_timestamp(text).map(|ts| Cell::TimeStampTz(ts.and_utc())),
            }
        }
        LogicalType::TimestampWithoutTimezone => {
            let text = value.as_str()?;
            match DateTime::parse_from_rfc3339(text) {
                Ok(timestamp) => Some(Cell::TimeStamp(timestamp.naive_local())),
                Err(_) => naive_timestamp(text).map(Cell::TimeStamp),
            }
        }
        LogicalType::TimeWithTimezone => {
            let text = value.as_str()?;
            DateTime::parse_from_rfc3339(&format!("1970-01-01T{text}"))
                .ok()
                .map(|_| Cell::String(text.to_owned()))
        }
        LogicalType::TimeWithoutTimezone => {
            let text = value.as_str()?;
            NAIVE_TIME_FORMATS
                .iter()
                .find_map(|format| NaiveTime::parse_from_str(text, format).ok())
                .map(Cell::Time)
        }
        LogicalType::Object => value.is_object().then(|| Cell::Json(value.clone())),
        LogicalType::Array => value.is_array().then(|| Cell::Json(value.clone())),
        LogicalType::Unknown => Some(Cell::Json(value.clone())),
    }
}

/// Parses a decimal in normalized form, rejecting exponents beyond [`MAX_DECIMAL_EXPONENT`].
fn decimal(value: &Value) -> Option<BigDecimal> {
    let decimal = match value {
        Value::Number(n) => BigDecimal::from_str(&n.to_string()).ok(),
        Value::String(s) => BigDecimal::from_str(s.trim()).ok(),
        _ => None,
    }?
    .normalized();

    let (_, scale) = decimal.as_bigint_and_exponent();
    (scale.abs() <= MAX_DECIMAL_EXPONENT).then_some(decimal)
}

fn naive_timestamp(text: &str) -> Option<NaiveDateTime> {
    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
}

/// Types a raw record into a final row of `stream`.
///
/// Columns whose value cannot be coerced are nulled and recorded in the meta column. Changes
/// reported by the source for the record are carried over ahead of them. Primary key parts
/// are taken from the typed cells, falling back to the raw JSON text of values that could not
/// be typed.
pub fn type_record(stream: &StreamConfig, record: &RawRecord) -> FinalRow {
    let mut changes = record.meta.changes.clone();

    let values: Vec<Cell> = stream
        .columns
        .iter()
        .map(|column| {
            let Some(value) = record.value(&column.name) else {
                return Cell::Null;
            };

            coerce(value, column.logical_type).unwrap_or_else(|| {
                changes.push(Change::typecast_error(column.name.as_str()));
                Cell::Null
            })
        })
        .collect();

    let primary_key = stream
        .primary_key
        .iter()
        .zip(record.primary_key_values(stream))
        .map(|(column, raw)| {
            let cell = stream
                .column_index(column)
                .and_then(|index| values.get(index))
                .unwrap_or(&Cell::Null);
            KeyPart::of(raw, cell)
        })
        .collect();

    FinalRow {
        raw_id: record.raw_id,
        extracted_at: record.extracted_at,
        generation_id: record.generation_id,
        values,
        primary_key,
        meta: Meta {
            sync_id: Some(stream.sync_id),
            changes,
        },
    }
}
