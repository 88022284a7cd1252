//! Typing of raw records into final rows, deduplication and materialization.

mod applier;
mod coercion;
mod dedup;

pub use applier::*;
pub use coercion::*;
pub use dedup::*;
