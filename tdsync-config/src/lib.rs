//! Configuration for the typing and deduplication sync engine.
//!
//! Provides environment detection, layered loading from YAML files and
//! environment variables, and the shared configuration types consumed by the
//! `tdsync` core.

mod environment;
mod load;
pub mod shared;

pub use environment::*;
pub use load::*;
