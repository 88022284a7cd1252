//! Helpers shared by unit and integration tests.
//!
//! Provides stream and record builders, a destination wrapper counting calls and injecting
//! faults, and a record producer staging records into the in-memory destination.

pub mod producer;
pub mod stream;
pub mod test_destination_wrapper;
