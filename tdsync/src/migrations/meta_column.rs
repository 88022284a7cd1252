use async_trait::async_trait;
use tracing::info;

use crate::destination::{DestinationHandler, Statement};
use crate::error::SyncResult;
use crate::migrations::{Migration, MigrationResult};
use crate::types::{DestinationInitialStatus, StreamConfig};

/// Destination state able to remember that the meta column was added.
pub trait MetaColumnState {
    fn meta_columns_migrated(&self) -> bool;

    fn with_meta_columns_migrated(self) -> Self;
}

/// Adds the meta column, which records typing failures, to tables created without it.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetaColumnMigration;

#[async_trait]
impl<D> Migration<D> for MetaColumnMigration
where
    D: DestinationHandler + Sync,
    D::State: MetaColumnState,
{
    fn name(&self) -> &'static str {
        "meta_column"
    }

    async fn migrate_if_necessary(
        &self,
        destination: &D,
        stream: &StreamConfig,
        status: &DestinationInitialStatus<D::State>,
    ) -> SyncResult<MigrationResult<D::State>> {
        let state = status.destination_state.clone();
        if !status.raw_table_exists() || state.meta_columns_migrated() {
            return Ok(MigrationResult::unchanged(state));
        }

        let altered = destination
            .execute(Statement::AddMetaColumns {
                stream: stream.id.clone(),
            })
            .await?;

        if altered > 0 {
            info!(stream = %stream.id, altered, "added meta columns");
        }

        Ok(MigrationResult {
            updated_state: state.with_meta_columns_migrated(),
            invalidated: altered > 0,
        })
    }
}
