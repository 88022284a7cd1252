use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;

use crate::types::{ColumnSchema, GenerationId, LogicalType, RawRecord, StreamConfig, StreamId, SyncMode};

/// Namespace of the final tables of test streams.
pub const TEST_NAMESPACE: &str = "test_schema";

pub fn test_stream_id(name: &str) -> StreamId {
    StreamId::new(Some("public"), name, TEST_NAMESPACE, name)
}

/// A stream of users with an integer id, a name, an integer age and an `updated_at` cursor.
///
/// Deduplicated modes key on `id`.
pub fn users_stream(name: &str, sync_mode: SyncMode) -> StreamConfig {
    StreamConfig {
        id: test_stream_id(name),
        sync_mode,
        primary_key: match sync_mode {
            SyncMode::Append => vec![],
            SyncMode::AppendDedup | SyncMode::Overwrite => vec!["id".to_owned()],
        },
        cursor: Some("updated_at".to_owned()),
        columns: vec![
            ColumnSchema::new("id", LogicalType::Integer),
            ColumnSchema::new("name", LogicalType::String),
            ColumnSchema::new("age", LogicalType::Integer),
            ColumnSchema::new("updated_at", LogicalType::Integer),
        ],
        sync_id: 1,
    }
}

/// A fixed point in time tests offset from, so that extraction order is deterministic.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

pub fn at_second(second: i64) -> DateTime<Utc> {
    base_time() + Duration::seconds(second)
}

/// Builds a raw record from a JSON object payload.
///
/// Non-object payloads produce a record with an empty payload.
pub fn raw_record(payload: Value, extracted_at: DateTime<Utc>, generation_id: GenerationId) -> RawRecord {
    let data = match payload {
        Value::Object(data) => data,
        _ => Default::default(),
    };

    RawRecord::new(data, extracted_at, generation_id)
}
