use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};

static REGISTER_METRICS: Once = Once::new();

pub const TDSYNC_RECORDS_APPLIED_TOTAL: &str = "tdsync_records_applied_total";
pub const TDSYNC_TYPING_FAILURES_TOTAL: &str = "tdsync_typing_failures_total";
pub const TDSYNC_MIGRATIONS_APPLIED_TOTAL: &str = "tdsync_migrations_applied_total";
pub const TDSYNC_MERGE_DURATION_SECONDS: &str = "tdsync_merge_duration_seconds";
pub const TDSYNC_STREAM_SYNCS_TOTAL: &str = "tdsync_stream_syncs_total";
pub const DESTINATION: &str = "destination";
pub const MIGRATION: &str = "migration";
pub const OUTCOME: &str = "outcome";

/// Register metrics emitted by the sync engine. This should be called before starting a
/// pipeline. It is safe to call this method multiple times, the metrics are only described
/// once.
pub(crate) fn register_metrics() {
    REGISTER_METRICS.call_once(|| {
        describe_counter!(
            TDSYNC_RECORDS_APPLIED_TOTAL,
            Unit::Count,
            "Total number of raw records materialized into final tables"
        );

        describe_counter!(
            TDSYNC_TYPING_FAILURES_TOTAL,
            Unit::Count,
            "Total number of columns nulled because their raw value could not be typed"
        );

        describe_counter!(
            TDSYNC_MIGRATIONS_APPLIED_TOTAL,
            Unit::Count,
            "Total number of migrations that changed destination tables"
        );

        describe_histogram!(
            TDSYNC_MERGE_DURATION_SECONDS,
            Unit::Seconds,
            "Time taken in seconds to merge a staged batch into a final table"
        );

        describe_counter!(
            TDSYNC_STREAM_SYNCS_TOTAL,
            Unit::Count,
            "Total number of stream pipelines run, by outcome"
        );
    });
}
