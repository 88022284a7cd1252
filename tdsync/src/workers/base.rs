use std::future::Future;

use crate::error::SyncResult;

/// A trait for types that can be started as workers.
///
/// The generic parameter `H` represents the handle type returned when the worker starts, and
/// `S` the state that can be observed through the handle.
pub trait Worker<H, S>
where
    H: WorkerHandle<S>,
{
    /// Starts the worker and returns a handle to it.
    fn start(self) -> impl Future<Output = SyncResult<H>> + Send;
}

/// A handle to a running worker.
pub trait WorkerHandle<S> {
    /// Output of a worker that ran to completion.
    type Output;

    /// Returns the current state of the worker.
    ///
    /// The state is shared with the worker and outlives it, so it can be read after the
    /// worker finished.
    fn state(&self) -> S;

    /// Returns a future that resolves when the worker completes.
    ///
    /// A panic inside the worker resolves to an error instead of propagating.
    fn wait(self) -> impl Future<Output = SyncResult<Self::Output>> + Send;
}
