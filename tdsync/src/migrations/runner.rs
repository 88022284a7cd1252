use std::sync::Arc;

use metrics::counter;
use tdsync_config::shared::SyncConfig;
use tracing::{debug, info};

use crate::concurrency::retry::with_retries;
use crate::concurrency::shutdown::ShutdownRx;
use crate::destination::DestinationHandler;
use crate::error::{ErrorKind, SyncResult};
use crate::metrics::{DESTINATION, MIGRATION, TDSYNC_MIGRATIONS_APPLIED_TOTAL};
use crate::migrations::MigrationRegistry;
use crate::prober::InitialStatusProber;
use crate::types::{DestinationInitialStatus, StreamConfig};

/// Runs every registered migration once for a stream.
///
/// Each migration sees the latest status: whenever one invalidates it, the stream is probed
/// again before the next migration runs, and the in-flight state is carried over to the
/// fresh status. The state is committed once, after the whole pass succeeded, and only if a
/// migration changed it.
#[derive(Debug)]
pub struct MigrationRunner<D>
where
    D: DestinationHandler + Sync,
{
    config: Arc<SyncConfig>,
    destination: D,
    registry: Arc<MigrationRegistry<D>>,
}

impl<D> MigrationRunner<D>
where
    D: DestinationHandler + Clone + Send + Sync + 'static,
{
    pub fn new(config: Arc<SyncConfig>, destination: D, registry: Arc<MigrationRegistry<D>>) -> Self {
        Self {
            config,
            destination,
            registry,
        }
    }

    /// Migrates `stream` and returns the status the rest of the pipeline must work from.
    ///
    /// Transient failures are retried with backoff and, once retries are exhausted, returned
    /// as is. Any other failure is returned as [`ErrorKind::SchemaMigrationFailed`].
    pub async fn run(
        &self,
        prober: &InitialStatusProber<D>,
        stream: &StreamConfig,
        status: DestinationInitialStatus<D::State>,
        shutdown: &ShutdownRx,
    ) -> SyncResult<DestinationInitialStatus<D::State>> {
        let persisted_state = status.destination_state.clone();
        let mut status = status;

        for migration in self.registry.migrations() {
            shutdown.check("migration")?;

            let current = &status;
            let result = with_retries(
                &self.config.retry,
                self.config.operation_timeout(),
                "migration",
                || migration.migrate_if_necessary(&self.destination, stream, current),
            )
            .await
            .map_err(|err| {
                if err.is_transient() {
                    err
                } else {
                    err.with_kind(
                        ErrorKind::SchemaMigrationFailed,
                        "Migration could not reconcile the destination tables",
                    )
                }
            })?;

            debug!(
                stream = %stream.id,
                migration = migration.name(),
                invalidated = result.invalidated,
                "ran migration"
            );

            status = if result.invalidated {
                counter!(
                    TDSYNC_MIGRATIONS_APPLIED_TOTAL,
                    DESTINATION => D::name(),
                    MIGRATION => migration.name()
                )
                .increment(1);

                prober.probe(stream).await?.with_state(result.updated_state)
            } else {
                status.with_state(result.updated_state)
            };
        }

        if status.destination_state != persisted_state {
            info!(stream = %stream.id, "committing migrated destination state");
            with_retries(
                &self.config.retry,
                self.config.operation_timeout(),
                "commit_state",
                || {
                    self.destination
                        .commit_state(&stream.id, &status.destination_state)
                },
            )
            .await?;
        }

        Ok(status)
    }
}
