use async_trait::async_trait;

use crate::destination::DestinationHandler;
use crate::error::SyncResult;
use crate::types::{DestinationInitialStatus, StreamConfig};

/// Outcome of a single migration.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationResult<S> {
    /// State to carry to the next migration and, at the end of the pass, to persist.
    pub updated_state: S,
    /// Whether the migration changed the tables so that the current status is stale.
    pub invalidated: bool,
}

impl<S> MigrationResult<S> {
    /// A result for a migration that had nothing to do.
    pub fn unchanged(state: S) -> Self {
        Self {
            updated_state: state,
            invalidated: false,
        }
    }
}

/// A unit of schema or data reconciliation run before materialization.
///
/// Implementations must:
/// - perform no warehouse call when the raw table does not exist, returning the incoming state;
/// - be idempotent, so that running on the state they produced is a no-op that does not
///   invalidate the status;
/// - report `invalidated` whenever the table shape changed.
#[async_trait]
pub trait Migration<D>: Send + Sync
where
    D: DestinationHandler + Sync,
{
    /// Name used in logs and metrics.
    fn name(&self) -> &'static str;

    async fn migrate_if_necessary(
        &self,
        destination: &D,
        stream: &StreamConfig,
        status: &DestinationInitialStatus<D::State>,
    ) -> SyncResult<MigrationResult<D::State>>;
}
