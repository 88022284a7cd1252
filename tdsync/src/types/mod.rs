//! Data model shared by every stage of a stream sync.
//!
//! Covers stream identity and configuration, logical column types, typed cell
//! values, raw and final records and the probed destination status.

mod cell;
mod logical_type;
mod record;
mod status;
mod stream;

pub use cell::*;
pub use logical_type::*;
pub use record::*;
pub use status::*;
pub use stream::*;

/// Monotonic per-stream counter tagging which run produced a raw record.
pub type GenerationId = u64;
