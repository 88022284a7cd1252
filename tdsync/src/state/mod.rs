//! Per-stream destination state carried across runs.

mod destination;

pub use destination::*;
