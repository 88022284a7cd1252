use std::fmt;

use crate::destination::DestinationHandler;
use crate::migrations::{
    GenerationIdMigration, GenerationTrackingState, MetaColumnMigration, MetaColumnState,
    Migration,
};

/// Fixed, ordered set of migrations run for every stream.
pub struct MigrationRegistry<D> {
    migrations: Vec<Box<dyn Migration<D>>>,
}

impl<D> MigrationRegistry<D>
where
    D: DestinationHandler + Sync,
{
    pub fn new() -> Self {
        Self {
            migrations: Vec::new(),
        }
    }

    /// Appends a migration, which will run after every migration already registered.
    pub fn register<M>(mut self, migration: M) -> Self
    where
        M: Migration<D> + 'static,
    {
        self.migrations.push(Box::new(migration));
        self
    }

    pub fn migrations(&self) -> &[Box<dyn Migration<D>>] {
        &self.migrations
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}

impl<D> MigrationRegistry<D>
where
    D: DestinationHandler + Sync,
    D::State: MetaColumnState + GenerationTrackingState,
{
    /// Registry with the built-in migrations, meta column first.
    pub fn with_defaults() -> Self {
        Self::new()
            .register(MetaColumnMigration)
            .register(GenerationIdMigration)
    }
}

impl<D> Default for MigrationRegistry<D>
where
    D: DestinationHandler + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<D> fmt::Debug for MigrationRegistry<D>
where
    D: DestinationHandler + Sync,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.migrations.iter().map(|migration| migration.name()))
            .finish()
    }
}
