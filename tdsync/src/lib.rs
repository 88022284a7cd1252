//! Destination-side sync engine that types and deduplicates replicated records.
//!
//! Raw records staged in a warehouse raw table are materialized into a typed final table,
//! one row per record for append streams or one row per primary key for deduplicated
//! streams. Every stream run goes through the same sequence: probe the destination, run
//! migrations, prepare the generation, let the record producer stage records, materialize
//! them and report the outcome. See [`pipeline::SyncPipeline`] for the entry point.

pub mod concurrency;
pub mod destination;
pub mod error;
pub mod generation;
mod macros;
mod metrics;
pub mod migrations;
pub mod pipeline;
pub mod prober;
pub mod reporter;
pub mod state;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod typing;
pub mod workers;
