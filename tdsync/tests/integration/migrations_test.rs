use std::sync::Arc;

use serde_json::{Map, Value, json};
use tdsync::concurrency::shutdown::create_shutdown_channel;
use tdsync::destination::DestinationHandler;
use tdsync::destination::memory::StoredRawRecord;
use tdsync::error::ErrorKind;
use tdsync::migrations::{
    GenerationIdMigration, MetaColumnMigration, Migration, MigrationRegistry, MigrationRunner,
};
use tdsync::pipeline::SyncRequest;
use tdsync::prober::InitialStatusProber;
use tdsync::state::DestinationState;
use tdsync::test_utils::stream::{at_second, users_stream};
use tdsync::test_utils::test_destination_wrapper::{COMMIT_STATE, PROBE};
use tdsync::types::{Cell, StreamConfig, SyncMode};

use crate::common::{TestContext, TestDestination, name_of, test_config, user};

fn payload(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object payload, got {other}"),
    }
}

/// Installs a raw table and an empty final table predating generation tracking.
async fn install_legacy_tables(ctx: &TestContext, stream: &StreamConfig) {
    ctx.memory
        .install_legacy_raw_table(
            &stream.id,
            vec![
                StoredRawRecord::legacy(payload(user(1, "ada", json!(36), 1)), Some(at_second(5))),
                StoredRawRecord::legacy(payload(user(2, "bob", json!(41), 1)), None),
            ],
        )
        .await;
    ctx.memory
        .install_legacy_final_table(&stream.id, stream.columns.clone(), vec![])
        .await;
}

fn runner(ctx: &TestContext) -> (InitialStatusProber<TestDestination>, MigrationRunner<TestDestination>) {
    let config = Arc::new(test_config());
    let prober = InitialStatusProber::new(config.clone(), ctx.destination.clone());
    let runner = MigrationRunner::new(
        config,
        ctx.destination.clone(),
        Arc::new(MigrationRegistry::with_defaults()),
    );

    (prober, runner)
}

#[tokio::test(flavor = "multi_thread")]
async fn migrations_skip_streams_without_a_raw_table() {
    let ctx = TestContext::new();
    let stream = users_stream("fresh_users", SyncMode::AppendDedup);
    let (prober, runner) = runner(&ctx);
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let status = prober.probe(&stream).await.unwrap();
    let migrated = runner
        .run(&prober, &stream, status.clone(), &shutdown_rx)
        .await
        .unwrap();

    assert_eq!(migrated, status);
    assert!(ctx.destination.statements().await.is_empty());
    assert_eq!(ctx.destination.calls(COMMIT_STATE).await, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn meta_column_migration_is_idempotent() {
    let ctx = TestContext::new();
    let stream = users_stream("legacy_meta", SyncMode::AppendDedup);
    install_legacy_tables(&ctx, &stream).await;
    let migration = MetaColumnMigration;

    let status = ctx.destination.probe(&stream).await.unwrap();
    let first = migration
        .migrate_if_necessary(&ctx.destination, &stream, &status)
        .await
        .unwrap();
    assert!(first.invalidated);
    assert!(first.updated_state.meta_columns_migrated);

    // Tables already altered, state not yet persisted.
    let second = migration
        .migrate_if_necessary(&ctx.destination, &stream, &status)
        .await
        .unwrap();
    assert!(!second.invalidated);
    assert_eq!(second.updated_state, first.updated_state);

    // State persisted, nothing is executed at all.
    ctx.destination.clear().await;
    let migrated = status.with_state(first.updated_state);
    let third = migration
        .migrate_if_necessary(&ctx.destination, &stream, &migrated)
        .await
        .unwrap();
    assert!(!third.invalidated);
    assert!(ctx.destination.statements().await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn generation_id_migration_backfills_once() {
    let ctx = TestContext::new();
    let stream = users_stream("legacy_generation", SyncMode::AppendDedup);
    install_legacy_tables(&ctx, &stream).await;
    let migration = GenerationIdMigration;

    let status = ctx.destination.probe(&stream).await.unwrap();
    let first = migration
        .migrate_if_necessary(&ctx.destination, &stream, &status)
        .await
        .unwrap();
    assert!(first.invalidated);
    assert!(first.updated_state.generation_tracking_migrated);

    let raw = ctx.memory.raw_records(&stream.id).await;
    assert!(raw.iter().all(|record| record.generation_id == Some(0)));
    // The record without an extraction time gets the earliest one of the table.
    assert!(raw.iter().all(|record| record.extracted_at == Some(at_second(5))));

    let second = migration
        .migrate_if_necessary(&ctx.destination, &stream, &status)
        .await
        .unwrap();
    assert!(!second.invalidated);
    assert_eq!(ctx.memory.raw_records(&stream.id).await, raw);
}

#[tokio::test(flavor = "multi_thread")]
async fn runner_reprobes_after_each_invalidating_migration_and_commits_once() {
    let ctx = TestContext::new();
    let stream = users_stream("legacy_runner", SyncMode::AppendDedup);
    install_legacy_tables(&ctx, &stream).await;
    let (prober, runner) = runner(&ctx);
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let status = prober.probe(&stream).await.unwrap();
    assert!(!status.final_table_schema_matches);
    let migrated = runner
        .run(&prober, &stream, status, &shutdown_rx)
        .await
        .unwrap();

    assert!(migrated.final_table_schema_matches);
    assert!(migrated.destination_state.meta_columns_migrated);
    assert!(migrated.destination_state.generation_tracking_migrated);
    assert!(!migrated.destination_state.needs_soft_reset());
    assert_eq!(ctx.destination.calls(PROBE).await, 3);
    assert_eq!(ctx.destination.calls(COMMIT_STATE).await, 1);
    assert_eq!(
        ctx.memory.state(&stream.id).await.unwrap(),
        migrated.destination_state
    );

    // A second pass finds nothing to do.
    ctx.destination.clear().await;
    let status = prober.probe(&stream).await.unwrap();
    runner
        .run(&prober, &stream, status, &shutdown_rx)
        .await
        .unwrap();
    assert!(ctx.destination.statements().await.is_empty());
    assert_eq!(ctx.destination.calls(COMMIT_STATE).await, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn legacy_tables_are_migrated_and_materialized() {
    let ctx = TestContext::new();
    let stream = users_stream("legacy_users", SyncMode::AppendDedup);
    install_legacy_tables(&ctx, &stream).await;

    let report = ctx.run(vec![SyncRequest::new(stream.clone())]).await;

    assert!(report.is_success());
    let rows = ctx.final_rows(&stream.id).await;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].values[0], Cell::I64(1));
    assert_eq!(name_of(&rows[0]), "ada");
    assert_eq!(name_of(&rows[1]), "bob");
    assert!(rows.iter().all(|row| row.generation_id == 0));

    let names = ctx.destination.statement_names(&stream.id).await;
    assert_eq!(
        &names[..3],
        &[
            "add_meta_columns",
            "add_generation_id_columns",
            "backfill_generation_ids"
        ]
    );
    // The migrated final table is kept rather than rebuilt.
    assert!(!names.contains(&"create_final_table"));
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_migration_aborts_the_stream_before_materialization() {
    let ctx = TestContext::new();
    let stream = users_stream("broken_users", SyncMode::AppendDedup);
    install_legacy_tables(&ctx, &stream).await;
    ctx.destination
        .fail_next("add_meta_columns", ErrorKind::DestinationQueryFailed, 1)
        .await;

    let report = ctx.run(vec![SyncRequest::new(stream.clone())]).await;

    let failed = report.get(&stream.id).unwrap();
    assert_eq!(
        failed.error.as_ref().map(|err| err.kind()),
        Some(ErrorKind::SchemaMigrationFailed)
    );
    assert_eq!(failed.summary.records_written, None);
    assert!(
        ctx.destination
            .statement_names(&stream.id)
            .await
            .is_empty()
    );
    assert_eq!(ctx.final_rows(&stream.id).await.len(), 0);
    assert_eq!(ctx.destination.calls(COMMIT_STATE).await, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn transient_migration_failures_are_retried() {
    let ctx = TestContext::new();
    let stream = users_stream("flaky_legacy_users", SyncMode::AppendDedup);
    install_legacy_tables(&ctx, &stream).await;
    ctx.destination
        .fail_next(
            "backfill_generation_ids",
            ErrorKind::DestinationConnectionFailed,
            1,
        )
        .await;

    let report = ctx.run(vec![SyncRequest::new(stream.clone())]).await;

    assert!(report.is_success());
    assert_eq!(ctx.destination.calls("backfill_generation_ids").await, 2);
    assert_eq!(ctx.final_rows(&stream.id).await.len(), 2);
    let state = ctx.memory.state(&stream.id).await.unwrap();
    assert!(state.generation_tracking_migrated);
}
