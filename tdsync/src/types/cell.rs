use std::cmp::Ordering;

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

/// A typed value of a final table column.
///
/// Time-with-timezone values have no native representation shared by all backends and are
/// kept as their validated ISO-8601 text in [`Cell::String`].
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    String(String),
    I64(i64),
    Numeric(BigDecimal),
    Date(NaiveDate),
    Time(NaiveTime),
    TimeStamp(NaiveDateTime),
    TimeStampTz(DateTime<Utc>),
    Json(serde_json::Value),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Total order used to compare cursor values.
    ///
    /// Null sorts before every other value. Values of different variants, which only happen
    /// when a column changed type between generations, are compared by their key text.
    pub fn compare(&self, other: &Cell) -> Ordering {
        match (self, other) {
            (Cell::Null, Cell::Null) => Ordering::Equal,
            (Cell::Null, _) => Ordering::Less,
            (_, Cell::Null) => Ordering::Greater,
            (Cell::Bool(a), Cell::Bool(b)) => a.cmp(b),
            (Cell::String(a), Cell::String(b)) => a.cmp(b),
            (Cell::I64(a), Cell::I64(b)) => a.cmp(b),
            (Cell::Numeric(a), Cell::Numeric(b)) => a.cmp(b),
            (Cell::I64(a), Cell::Numeric(b)) => BigDecimal::from(*a).cmp(b),
            (Cell::Numeric(a), Cell::I64(b)) => a.cmp(&BigDecimal::from(*b)),
            (Cell::Date(a), Cell::Date(b)) => a.cmp(b),
            (Cell::Time(a), Cell::Time(b)) => a.cmp(b),
            (Cell::TimeStamp(a), Cell::TimeStamp(b)) => a.cmp(b),
            (Cell::TimeStampTz(a), Cell::TimeStampTz(b)) => a.cmp(b),
            (a, b) => a.key_text().cmp(&b.key_text()),
        }
    }

    /// Canonical text of the value, used to build primary key identities.
    ///
    /// Null maps to `None` so that it never collides with a string value.
    pub fn key_text(&self) -> Option<String> {
        let text = match self {
            Cell::Null => return None,
            Cell::Bool(b) => b.to_string(),
            Cell::String(s) => s.clone(),
            Cell::I64(i) => i.to_string(),
            Cell::Numeric(n) => n.normalized().to_string(),
            Cell::Date(d) => d.format("%Y-%m-%d").to_string(),
            Cell::Time(t) => t.format("%H:%M:%S%.f").to_string(),
            Cell::TimeStamp(ts) => ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string(),
            Cell::TimeStampTz(ts) => ts.to_rfc3339(),
            Cell::Json(j) => j.to_string(),
        };

        Some(text)
    }
}
