use async_trait::async_trait;
use tracing::info;

use crate::destination::{DestinationHandler, Statement};
use crate::error::SyncResult;
use crate::migrations::{Migration, MigrationResult};
use crate::types::{DestinationInitialStatus, GenerationId, StreamConfig};

/// Generation assigned to rows written before generation tracking existed.
///
/// The smallest possible generation, so that any later generation supersedes them.
pub const BACKFILL_GENERATION_ID: GenerationId = 0;

/// Destination state able to remember that generation tracking was retrofitted.
pub trait GenerationTrackingState {
    fn generation_tracking_migrated(&self) -> bool;

    fn with_generation_tracking_migrated(self) -> Self;
}

/// Retrofits generation tracking onto tables created without it.
///
/// Adds the generation columns, then backfills pre-existing raw rows with
/// [`BACKFILL_GENERATION_ID`] and, where the extraction time is unknown, the earliest
/// extraction time found in the raw table.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenerationIdMigration;

#[async_trait]
impl<D> Migration<D> for GenerationIdMigration
where
    D: DestinationHandler + Sync,
    D::State: GenerationTrackingState,
{
    fn name(&self) -> &'static str {
        "generation_id"
    }

    async fn migrate_if_necessary(
        &self,
        destination: &D,
        stream: &StreamConfig,
        status: &DestinationInitialStatus<D::State>,
    ) -> SyncResult<MigrationResult<D::State>> {
        let state = status.destination_state.clone();
        if !status.raw_table_exists() || state.generation_tracking_migrated() {
            return Ok(MigrationResult::unchanged(state));
        }

        let altered = destination
            .execute(Statement::AddGenerationIdColumns {
                stream: stream.id.clone(),
            })
            .await?;
        let backfilled = destination
            .execute(Statement::BackfillGenerationIds {
                stream: stream.id.clone(),
                generation_id: BACKFILL_GENERATION_ID,
            })
            .await?;

        if altered > 0 || backfilled > 0 {
            info!(
                stream = %stream.id,
                altered,
                backfilled,
                "retrofitted generation tracking"
            );
        }

        Ok(MigrationResult {
            updated_state: state.with_generation_tracking_migrated(),
            invalidated: altered > 0 || backfilled > 0,
        })
    }
}
