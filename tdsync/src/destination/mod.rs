//! Destination handler abstraction and the in-memory reference backend.
//!
//! The [`DestinationHandler`] trait is the narrow interface the sync engine drives: probing
//! warehouse state, executing [`Statement`]s, reading staged raw records and persisting the
//! per-stream [`crate::state::DestinationState`].

mod base;
pub mod memory;

pub use base::*;
