//! Ordered, idempotent migrations that bring a stream's destination tables to the shape the
//! engine expects before any record is materialized.

mod base;
mod generation_id;
mod meta_column;
mod registry;
mod runner;

pub use base::*;
pub use generation_id::*;
pub use meta_column::*;
pub use registry::*;
pub use runner::*;
