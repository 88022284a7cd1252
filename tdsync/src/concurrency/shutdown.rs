use crate::bail;
use crate::concurrency::signal::{SignalRx, SignalTx, create_signal};
use crate::error::{ErrorKind, SyncResult};

/// Handle used by the orchestrator to cancel a running sync.
#[derive(Debug, Clone)]
pub struct ShutdownTx(SignalTx);

impl ShutdownTx {
    pub fn wrap(tx: SignalTx) -> Self {
        Self(tx)
    }

    /// Requests every stream pipeline to stop at its next cancellation point.
    ///
    /// The request is kept even if no worker is subscribed yet, so workers started later
    /// observe it too.
    pub fn shutdown(&self) {
        self.0.send_replace(true);
    }

    pub fn subscribe(&self) -> ShutdownRx {
        ShutdownRx(self.0.subscribe())
    }
}

/// Receiving side of the shutdown channel, cloned into every stream worker.
#[derive(Debug, Clone)]
pub struct ShutdownRx(SignalRx);

impl ShutdownRx {
    pub fn is_shutdown(&self) -> bool {
        *self.0.borrow()
    }

    /// Fails with [`ErrorKind::OperationCanceled`] if shutdown was requested.
    ///
    /// Called between pipeline stages and between merge steps, never in the middle of one.
    pub fn check(&self, stage: &'static str) -> SyncResult<()> {
        if self.is_shutdown() {
            bail!(
                ErrorKind::OperationCanceled,
                "Sync was canceled",
                format!("canceled before {stage}")
            );
        }

        Ok(())
    }

    /// Resolves once shutdown is requested. Never resolves if the sender is dropped first.
    pub async fn wait(&mut self) {
        if self.0.wait_for(|shutdown| *shutdown).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = create_signal();
    (ShutdownTx::wrap(tx), ShutdownRx(rx))
}
