//! Logging setup for processes embedding the sync engine.
//!
//! Production environments write JSON logs to daily rolling files, development
//! environments print pretty logs to the terminal. Both capture `log` records
//! and route panics through `tracing`.

mod logging;

pub use logging::*;
