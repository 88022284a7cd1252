use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::destination::{DestinationHandler, RawRecordQuery, Statement};
use crate::error::{ErrorKind, SyncResult};
use crate::sync_error;
use crate::types::{DestinationInitialStatus, RawRecord, StreamConfig, StreamId};

pub const PROBE: &str = "probe";
pub const FETCH_RAW_RECORDS: &str = "fetch_raw_records";
pub const COMMIT_STATE: &str = "commit_state";

#[derive(Debug, Default)]
struct Inner {
    calls: HashMap<&'static str, usize>,
    statements: Vec<Statement>,
    faults: HashMap<&'static str, VecDeque<ErrorKind>>,
    delays: HashMap<&'static str, Duration>,
}

/// Wraps a destination to count its calls and inject failures.
///
/// Operations are identified by name: [`PROBE`], [`FETCH_RAW_RECORDS`], [`COMMIT_STATE`] or
/// the [`Statement::name`] of an executed statement. Injected failures and delays apply
/// before the wrapped destination is called, so a failed call has no effect on it.
#[derive(Debug, Clone)]
pub struct TestDestinationWrapper<D> {
    wrapped_destination: D,
    inner: Arc<Mutex<Inner>>,
}

impl<D> TestDestinationWrapper<D> {
    /// Create a new test wrapper around any destination
    pub fn wrap(destination: D) -> Self {
        Self {
            wrapped_destination: destination,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    pub fn wrapped(&self) -> &D {
        &self.wrapped_destination
    }

    /// Makes the next `times` calls of `operation` fail with `kind`.
    pub async fn fail_next(&self, operation: &'static str, kind: ErrorKind, times: usize) {
        let mut inner = self.inner.lock().await;
        let faults = inner.faults.entry(operation).or_default();
        faults.extend(std::iter::repeat_n(kind, times));
    }

    /// Delays every call of `operation` by `delay`.
    pub async fn delay(&self, operation: &'static str, delay: Duration) {
        let mut inner = self.inner.lock().await;
        inner.delays.insert(operation, delay);
    }

    pub async fn calls(&self, operation: &str) -> usize {
        let inner = self.inner.lock().await;
        inner.calls.get(operation).copied().unwrap_or(0)
    }

    /// Number of calls of every operation, probes included.
    pub async fn total_calls(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.calls.values().sum()
    }

    /// Statements executed successfully by the wrapped destination, in order.
    pub async fn statements(&self) -> Vec<Statement> {
        let inner = self.inner.lock().await;
        inner.statements.clone()
    }

    /// Names of the statements executed successfully for `stream`, in order.
    pub async fn statement_names(&self, stream: &StreamId) -> Vec<&'static str> {
        let inner = self.inner.lock().await;
        inner
            .statements
            .iter()
            .filter(|statement| statement.stream() == stream)
            .map(Statement::name)
            .collect()
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.calls.clear();
        inner.statements.clear();
    }

    async fn before_call(&self, operation: &'static str) -> SyncResult<()> {
        let delay = {
            let mut inner = self.inner.lock().await;
            *inner.calls.entry(operation).or_default() += 1;

            if let Some(kind) = inner
                .faults
                .get_mut(operation)
                .and_then(|faults| faults.pop_front())
            {
                return Err(sync_error!(kind, "Injected test failure", operation));
            }

            inner.delays.get(operation).copied()
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        Ok(())
    }
}

impl<D> DestinationHandler for TestDestinationWrapper<D>
where
    D: DestinationHandler + Send + Sync,
{
    type State = D::State;

    fn name() -> &'static str {
        D::name()
    }

    async fn probe(
        &self,
        stream: &StreamConfig,
    ) -> SyncResult<DestinationInitialStatus<Self::State>> {
        self.before_call(PROBE).await?;
        self.wrapped_destination.probe(stream).await
    }

    async fn execute(&self, statement: Statement) -> SyncResult<u64> {
        self.before_call(statement.name()).await?;
        let affected = self.wrapped_destination.execute(statement.clone()).await?;

        let mut inner = self.inner.lock().await;
        inner.statements.push(statement);

        Ok(affected)
    }

    async fn fetch_raw_records(&self, query: RawRecordQuery) -> SyncResult<Vec<RawRecord>> {
        self.before_call(FETCH_RAW_RECORDS).await?;
        self.wrapped_destination.fetch_raw_records(query).await
    }

    async fn commit_state(&self, stream: &StreamId, state: &Self::State) -> SyncResult<()> {
        self.before_call(COMMIT_STATE).await?;
        self.wrapped_destination.commit_state(stream, state).await
    }
}
