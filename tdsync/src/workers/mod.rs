//! Workers running stream pipelines concurrently.
//!
//! Each requested stream gets one [`stream_sync::StreamSyncWorker`], spawned on the runtime
//! and tracked by a [`pool::StreamSyncWorkerPool`] until it finishes.

pub mod base;
pub mod pool;
pub mod stream_sync;
