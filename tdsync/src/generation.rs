use std::sync::Arc;

use tdsync_config::shared::SyncConfig;
use tracing::info;

use crate::concurrency::retry::with_retries;
use crate::destination::{DestinationHandler, Statement};
use crate::error::SyncResult;
use crate::state::DestinationState;
use crate::types::{DestinationInitialStatus, GenerationId, StreamConfig, SyncMode};

/// Generation bookkeeping for one stream run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationPlan {
    /// Generation every raw record produced during this run is tagged with.
    pub current_generation_id: GenerationId,
    /// Raw records below this generation are invisible to materialization.
    pub minimum_generation_id_to_retain: GenerationId,
    /// Whether this run started a new generation.
    pub bumped: bool,
    /// Whether the final table is recreated and replayed from the retained raw records.
    pub rebuild_final_table: bool,
}

impl GenerationPlan {
    /// Computes the plan of a run from the migrated status of its stream.
    ///
    /// A new generation is started only on an explicit soft reset request, when a migration
    /// asked for one through the destination state, or for overwrite streams. A bumped
    /// generation retains only itself. Otherwise all history is retained, and a missing or
    /// mismatching final table is rebuilt without bumping.
    pub fn for_stream<S: DestinationState>(
        stream: &StreamConfig,
        status: &DestinationInitialStatus<S>,
        soft_reset_requested: bool,
    ) -> Self {
        let bump = soft_reset_requested
            || status.destination_state.needs_soft_reset()
            || stream.sync_mode == SyncMode::Overwrite;

        if bump {
            let current_generation_id = status.initial_generation_id + 1;
            return Self {
                current_generation_id,
                minimum_generation_id_to_retain: current_generation_id,
                bumped: true,
                rebuild_final_table: true,
            };
        }

        Self {
            current_generation_id: status.initial_generation_id,
            minimum_generation_id_to_retain: 0,
            bumped: false,
            rebuild_final_table: !status.final_table_exists || !status.final_table_schema_matches,
        }
    }
}

/// Prepares the destination for the generation plan of a run.
#[derive(Debug, Clone)]
pub struct GenerationManager<D> {
    config: Arc<SyncConfig>,
    destination: D,
}

impl<D> GenerationManager<D>
where
    D: DestinationHandler + Clone + Send + Sync + 'static,
{
    pub fn new(config: Arc<SyncConfig>, destination: D) -> Self {
        Self {
            config,
            destination,
        }
    }

    /// Plans the run and applies its effects before any record is tagged.
    ///
    /// On a bump the new generation is recorded first, then raw records below the retained
    /// minimum are purged. On a rebuild every retained raw record is marked unprocessed.
    /// In both cases the final table is recreated empty.
    pub async fn prepare(
        &self,
        stream: &StreamConfig,
        status: &DestinationInitialStatus<D::State>,
        soft_reset_requested: bool,
    ) -> SyncResult<GenerationPlan> {
        let plan = GenerationPlan::for_stream(stream, status, soft_reset_requested);
        let id = &stream.id;

        let mut statements = Vec::new();
        if plan.bumped {
            info!(
                stream = %id,
                generation_id = plan.current_generation_id,
                "starting a new generation"
            );
            statements.push(Statement::AdvanceGeneration {
                stream: id.clone(),
                generation_id: plan.current_generation_id,
            });
            if status.raw_table_exists() {
                statements.push(Statement::DeleteRawRecordsBelowGeneration {
                    stream: id.clone(),
                    generation_id: plan.minimum_generation_id_to_retain,
                });
            }
        } else if plan.rebuild_final_table && status.raw_table_exists() {
            info!(stream = %id, "rebuilding final table from retained raw records");
            statements.push(Statement::ResetLoadedAt {
                stream: id.clone(),
                min_generation: plan.minimum_generation_id_to_retain,
            });
        }

        if plan.rebuild_final_table {
            if status.final_table_exists && !status.final_table_empty {
                info!(stream = %id, "replacing non-empty final table");
            }
            statements.push(Statement::CreateFinalTable {
                stream: id.clone(),
                columns: stream.columns.clone(),
                replace: true,
            });
        }

        for statement in statements {
            let name = statement.name();
            with_retries(
                &self.config.retry,
                self.config.operation_timeout(),
                name,
                || self.destination.execute(statement.clone()),
            )
            .await?;
        }

        Ok(plan)
    }
}
