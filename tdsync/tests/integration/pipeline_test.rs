use std::time::Duration;

use serde_json::json;
use tdsync::destination::DestinationHandler;
use tdsync::error::ErrorKind;
use tdsync::pipeline::SyncRequest;
use tdsync::reporter::StreamStatus;
use tdsync::state::DestinationState;
use tdsync::test_utils::stream::{at_second, raw_record, users_stream};
use tdsync::test_utils::test_destination_wrapper::{FETCH_RAW_RECORDS, PROBE};
use tdsync::types::{Cell, Change, ColumnSchema, LogicalType, SyncMode};
use tdsync_config::shared::{RetryConfig, SyncConfig};

use crate::common::{TestContext, name_of, test_config, user};

#[tokio::test(flavor = "multi_thread")]
async fn append_stream_materializes_every_record() {
    let ctx = TestContext::new();
    let stream = users_stream("append_users", SyncMode::Append);
    for i in 1..=3 {
        ctx.producer
            .push(&stream.id, user(i, "user", json!(20 + i), i), at_second(i))
            .await;
    }

    let report = ctx.run(vec![SyncRequest::new(stream.clone())]).await;

    assert!(report.is_success());
    let summary = report.summary(&stream.id).unwrap();
    assert_eq!(summary.records_written, Some(3));
    assert_eq!(summary.status_from_source, StreamStatus::Complete);

    let rows = ctx.final_rows(&stream.id).await;
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|row| row.generation_id == 0));
    assert!(rows.iter().all(|row| row.meta.sync_id == Some(1)));

    let raw = ctx.memory.raw_records(&stream.id).await;
    assert!(raw.iter().all(|record| record.loaded_at.is_some()));

    let merges = ctx
        .destination
        .statement_names(&stream.id)
        .await
        .into_iter()
        .filter(|name| *name == "merge_staging_into_final")
        .count();
    assert_eq!(merges, 2);
    assert!(!ctx.memory.staging_table_exists(&stream.id).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn dedup_keeps_the_newest_record_per_key_across_generations() {
    let ctx = TestContext::new();
    let stream = users_stream("dedup_users", SyncMode::AppendDedup);
    ctx.memory
        .stage_raw_records(
            &stream.id,
            vec![
                raw_record(user(42, "A", json!(30), 10), at_second(1), 3),
                raw_record(user(42, "B", json!(31), 12), at_second(2), 4),
            ],
        )
        .await;

    let report = ctx.run(vec![SyncRequest::new(stream.clone())]).await;

    assert!(report.is_success());
    let rows = ctx.final_rows(&stream.id).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].values[0], Cell::I64(42));
    assert_eq!(name_of(&rows[0]), "B");
    assert_eq!(rows[0].generation_id, 4);

    let status = ctx.destination.probe(&stream).await.unwrap();
    assert!(status.final_table_exists);
    assert!(!status.final_table_empty);
}

#[tokio::test(flavor = "multi_thread")]
async fn dedup_orders_by_cursor_before_extraction_time() {
    let ctx = TestContext::new();
    let stream = users_stream("cursor_users", SyncMode::AppendDedup);
    ctx.producer
        .push(&stream.id, user(1, "newest", json!(1), 50), at_second(1))
        .await;
    ctx.producer
        .push(&stream.id, user(1, "stale", json!(1), 10), at_second(2))
        .await;
    ctx.producer
        .push(&stream.id, user(2, "first", json!(1), 5), at_second(3))
        .await;
    ctx.run(vec![SyncRequest::new(stream.clone())]).await;

    // A later run with an older cursor must not overwrite the existing row.
    ctx.producer
        .push(&stream.id, user(1, "late", json!(1), 20), at_second(10))
        .await;
    ctx.producer
        .push(&stream.id, user(2, "second", json!(1), 5), at_second(11))
        .await;
    ctx.run(vec![SyncRequest::new(stream.clone())]).await;

    let rows = ctx.final_rows(&stream.id).await;
    assert_eq!(rows.len(), 2);
    assert_eq!(name_of(&rows[0]), "newest");
    // Equal cursors fall back to the extraction time.
    assert_eq!(name_of(&rows[1]), "second");
}

#[tokio::test(flavor = "multi_thread")]
async fn rerunning_without_new_records_changes_nothing() {
    let ctx = TestContext::new();
    let stream = users_stream("rerun_users", SyncMode::AppendDedup);
    for i in 1..=3 {
        ctx.producer
            .push(&stream.id, user(i, "user", json!(30), i), at_second(i))
            .await;
    }
    ctx.run(vec![SyncRequest::new(stream.clone())]).await;
    let first = ctx.final_rows(&stream.id).await;

    let report = ctx.run(vec![SyncRequest::new(stream.clone())]).await;

    assert_eq!(ctx.final_rows(&stream.id).await, first);
    let summary = report.summary(&stream.id).unwrap();
    assert_eq!(summary.records_written, Some(0));
    assert!(!summary.may_have_written_records());
}

#[tokio::test(flavor = "multi_thread")]
async fn resuming_after_an_unmarked_merge_is_idempotent() {
    let ctx = TestContext::new();
    let stream = users_stream("resume_users", SyncMode::Append);
    ctx.producer
        .push(&stream.id, user(1, "a", json!(1), 1), at_second(1))
        .await;
    ctx.producer
        .push(&stream.id, user(2, "b", json!(2), 2), at_second(2))
        .await;
    ctx.destination
        .fail_next("mark_raw_records_loaded", ErrorKind::DestinationQueryFailed, 1)
        .await;

    let report = ctx.run(vec![SyncRequest::new(stream.clone())]).await;

    let failed = report.get(&stream.id).unwrap();
    assert_eq!(
        failed.error.as_ref().map(|err| err.kind()),
        Some(ErrorKind::DestinationQueryFailed)
    );
    assert_eq!(failed.summary.status_from_source, StreamStatus::Incomplete);
    assert_eq!(failed.summary.records_written, Some(2));
    let merged_once = ctx.final_rows(&stream.id).await;
    assert_eq!(merged_once.len(), 2);
    assert!(
        ctx.memory
            .raw_records(&stream.id)
            .await
            .iter()
            .all(|record| record.loaded_at.is_none())
    );

    let report = ctx.run(vec![SyncRequest::new(stream.clone())]).await;

    assert!(report.is_success());
    assert_eq!(ctx.final_rows(&stream.id).await, merged_once);
    assert!(
        ctx.memory
            .raw_records(&stream.id)
            .await
            .iter()
            .all(|record| record.loaded_at.is_some())
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn typing_failures_null_the_column_and_keep_the_row() {
    let ctx = TestContext::new();
    let stream = users_stream("typing_users", SyncMode::Append);
    ctx.producer
        .push(&stream.id, user(1, "ada", json!("very old"), 1), at_second(1))
        .await;
    ctx.producer
        .push(&stream.id, user(2, "bob", json!(40), 2), at_second(2))
        .await;

    let report = ctx.run(vec![SyncRequest::new(stream.clone())]).await;

    assert!(report.is_success());
    let rows = ctx.final_rows(&stream.id).await;
    assert_eq!(rows.len(), 2);

    assert_eq!(name_of(&rows[0]), "ada");
    assert_eq!(rows[0].values[2], Cell::Null);
    assert_eq!(rows[0].meta.changes, vec![Change::typecast_error("age")]);

    assert_eq!(rows[1].values[2], Cell::I64(40));
    assert!(rows[1].meta.changes.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn untypable_primary_keys_are_not_merged_together() {
    let ctx = TestContext::new();
    let stream = users_stream("untyped_key_users", SyncMode::AppendDedup);
    let payloads = [
        json!({"id": "abc", "name": "abc-1", "age": 1, "updated_at": 1}),
        json!({"id": "xyz", "name": "xyz", "age": 1, "updated_at": 2}),
        json!({"id": "abc", "name": "abc-2", "age": 1, "updated_at": 3}),
        json!({"name": "missing", "age": 1, "updated_at": 4}),
        json!({"id": null, "name": "null", "age": 1, "updated_at": 5}),
    ];
    for (second, payload) in (1..).zip(payloads) {
        ctx.producer.push(&stream.id, payload, at_second(second)).await;
    }

    let report = ctx.run(vec![SyncRequest::new(stream.clone())]).await;

    assert!(report.is_success());
    let rows = ctx.final_rows(&stream.id).await;
    let mut names: Vec<&str> = rows.iter().map(name_of).collect();
    names.sort_unstable();
    assert_eq!(names, vec!["abc-2", "null", "xyz"]);
    assert!(rows.iter().all(|row| row.values[0] == Cell::Null));

    for row in &rows {
        let expected = match name_of(row) {
            "null" => vec![],
            _ => vec![Change::typecast_error("id")],
        };
        assert_eq!(row.meta.changes, expected);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn composite_primary_keys_deduplicate_on_every_column() {
    let ctx = TestContext::new();
    let mut stream = users_stream("composite_users", SyncMode::AppendDedup);
    stream.primary_key = vec!["id".to_owned(), "name".to_owned()];
    ctx.producer
        .push(&stream.id, user(1, "a", json!(10), 1), at_second(1))
        .await;
    ctx.producer
        .push(&stream.id, user(1, "b", json!(20), 1), at_second(2))
        .await;
    ctx.producer
        .push(&stream.id, user(1, "a", json!(11), 2), at_second(3))
        .await;
    ctx.producer
        .push(&stream.id, user(2, "a", json!(30), 1), at_second(4))
        .await;

    let report = ctx.run(vec![SyncRequest::new(stream.clone())]).await;

    assert!(report.is_success());
    let rows = ctx.final_rows(&stream.id).await;
    let mut keyed: Vec<(Cell, &str, Cell)> = rows
        .iter()
        .map(|row| (row.values[0].clone(), name_of(row), row.values[2].clone()))
        .collect();
    keyed.sort_by(|a, b| a.0.compare(&b.0).then_with(|| a.1.cmp(b.1)));
    assert_eq!(
        keyed,
        vec![
            (Cell::I64(1), "a", Cell::I64(11)),
            (Cell::I64(1), "b", Cell::I64(20)),
            (Cell::I64(2), "a", Cell::I64(30)),
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_stream_does_not_abort_its_siblings() {
    let ctx = TestContext::new();
    let failing = users_stream("failing_users", SyncMode::AppendDedup);
    let healthy = users_stream("healthy_users", SyncMode::Append);
    ctx.producer.fail(&failing.id).await;
    ctx.producer
        .push(&healthy.id, user(1, "a", json!(1), 1), at_second(1))
        .await;

    let report = ctx
        .run(vec![SyncRequest::new(failing.clone()), SyncRequest::new(healthy.clone())])
        .await;

    assert!(!report.is_success());
    let failed = report.get(&failing.id).unwrap();
    assert_eq!(
        failed.error.as_ref().map(|err| err.kind()),
        Some(ErrorKind::InvalidData)
    );
    assert_eq!(failed.summary.status_from_source, StreamStatus::Incomplete);
    assert!(failed.summary.may_have_written_records());

    let succeeded = report.get(&healthy.id).unwrap();
    assert!(succeeded.error.is_none());
    assert_eq!(succeeded.summary.records_written, Some(1));
    assert_eq!(ctx.final_rows(&healthy.id).await.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn panicking_stream_is_reported_without_affecting_siblings() {
    let ctx = TestContext::new();
    let panicking = users_stream("panicking_users", SyncMode::Append);
    let healthy = users_stream("calm_users", SyncMode::Append);
    ctx.producer.panic_on(&panicking.id).await;
    ctx.producer
        .push(&healthy.id, user(1, "a", json!(1), 1), at_second(1))
        .await;

    let report = ctx
        .run(vec![SyncRequest::new(panicking.clone()), SyncRequest::new(healthy.clone())])
        .await;

    let panicked = report.get(&panicking.id).unwrap();
    assert_eq!(
        panicked.error.as_ref().map(|err| err.kind()),
        Some(ErrorKind::StreamSyncWorkerPanic)
    );
    assert_eq!(panicked.summary.status_from_source, StreamStatus::Incomplete);
    assert!(report.get(&healthy.id).unwrap().error.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn transient_probe_failures_are_retried() {
    let ctx = TestContext::new();
    let stream = users_stream("flaky_users", SyncMode::Append);
    ctx.destination
        .fail_next(PROBE, ErrorKind::DestinationConnectionFailed, 2)
        .await;

    let report = ctx.run(vec![SyncRequest::new(stream.clone())]).await;

    assert!(report.is_success());
    assert_eq!(ctx.destination.calls(PROBE).await, 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn exhausted_retries_fail_only_that_stream() {
    let ctx = TestContext::new();
    let stream = users_stream("expired_users", SyncMode::Append);
    ctx.destination
        .fail_next(PROBE, ErrorKind::AuthenticationExpired, 3)
        .await;

    let report = ctx.run(vec![SyncRequest::new(stream.clone())]).await;

    let failed = report.get(&stream.id).unwrap();
    let err = failed.error.as_ref().unwrap();
    assert_eq!(err.kind(), ErrorKind::AuthenticationExpired);
    assert!(err.is_transient());
    assert_eq!(failed.summary.records_written, None);
    assert!(failed.summary.may_have_written_records());
    assert_eq!(ctx.destination.calls(PROBE).await, 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn slow_warehouse_calls_time_out() {
    let ctx = TestContext::new();
    let stream = users_stream("slow_users", SyncMode::Append);
    ctx.producer
        .push(&stream.id, user(1, "a", json!(1), 1), at_second(1))
        .await;
    ctx.destination
        .delay(FETCH_RAW_RECORDS, Duration::from_millis(500))
        .await;
    let config = SyncConfig {
        operation_timeout_ms: 50,
        retry: RetryConfig {
            max_attempts: 2,
            ..test_config().retry
        },
        ..test_config()
    };

    let report = ctx
        .pipeline_with_config(config)
        .run(vec![SyncRequest::new(stream.clone())], ctx.producer.clone())
        .await
        .unwrap();

    let failed = report.get(&stream.id).unwrap();
    assert_eq!(
        failed.error.as_ref().map(|err| err.kind()),
        Some(ErrorKind::DestinationTimeout)
    );
    assert_eq!(ctx.destination.calls(FETCH_RAW_RECORDS).await, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_identifiers_fail_before_any_warehouse_call() {
    let ctx = TestContext::new();
    let mut stream = users_stream("bad_users", SyncMode::Append);
    stream.id.final_name = "bad`name".to_owned();

    let report = ctx.run(vec![SyncRequest::new(stream.clone())]).await;

    let err = report.get(&stream.id).unwrap().error.clone().unwrap();
    assert_eq!(err.kind(), ErrorKind::InvalidStreamIdentifier);
    assert!(err.kind().is_config());
    assert_eq!(ctx.destination.total_calls().await, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn soft_reset_replays_only_the_new_generation() {
    let ctx = TestContext::new();
    let stream = users_stream("reset_users", SyncMode::AppendDedup);
    ctx.producer
        .push(&stream.id, user(1, "old", json!(1), 1), at_second(1))
        .await;
    ctx.producer
        .push(&stream.id, user(2, "old", json!(1), 1), at_second(2))
        .await;
    ctx.run(vec![SyncRequest::new(stream.clone())]).await;

    ctx.producer
        .push(&stream.id, user(3, "new", json!(1), 1), at_second(3))
        .await;
    let report = ctx.run(vec![SyncRequest::soft_reset(stream.clone())]).await;

    assert!(report.is_success());
    let rows = ctx.final_rows(&stream.id).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].values[0], Cell::I64(3));
    assert_eq!(rows[0].generation_id, 1);

    let raw = ctx.memory.raw_records(&stream.id).await;
    assert!(raw.iter().all(|record| record.generation_id == Some(1)));
    assert_eq!(ctx.producer.produced_generations(&stream.id).await, vec![0, 1]);
    assert_eq!(ctx.memory.generation_high_water(&stream.id).await, Some(1));
}

#[tokio::test(flavor = "multi_thread")]
async fn requested_soft_reset_in_state_is_cleared_after_success() {
    let ctx = TestContext::new();
    let stream = users_stream("flagged_users", SyncMode::AppendDedup);
    ctx.producer
        .push(&stream.id, user(1, "a", json!(1), 1), at_second(1))
        .await;
    ctx.run(vec![SyncRequest::new(stream.clone())]).await;

    let state = ctx.memory.state(&stream.id).await.unwrap();
    ctx.memory
        .commit_state(&stream.id, &state.with_soft_reset(true))
        .await
        .unwrap();

    ctx.run(vec![SyncRequest::new(stream.clone())]).await;

    let state = ctx.memory.state(&stream.id).await.unwrap();
    assert!(!state.needs_soft_reset());
    assert!(state.meta_columns_migrated && state.generation_tracking_migrated);
    assert_eq!(ctx.producer.produced_generations(&stream.id).await, vec![0, 1]);
}

#[tokio::test(flavor = "multi_thread")]
async fn overwrite_streams_replace_the_final_table_every_run() {
    let ctx = TestContext::new();
    let stream = users_stream("overwrite_users", SyncMode::Overwrite);
    ctx.producer
        .push(&stream.id, user(1, "a", json!(1), 1), at_second(1))
        .await;
    ctx.producer
        .push(&stream.id, user(2, "b", json!(1), 1), at_second(2))
        .await;
    ctx.run(vec![SyncRequest::new(stream.clone())]).await;
    assert_eq!(ctx.final_rows(&stream.id).await.len(), 2);

    ctx.producer
        .push(&stream.id, user(3, "c", json!(1), 1), at_second(3))
        .await;
    ctx.run(vec![SyncRequest::new(stream.clone())]).await;

    let rows = ctx.final_rows(&stream.id).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].values[0], Cell::I64(3));
    assert_eq!(ctx.producer.produced_generations(&stream.id).await, vec![1, 2]);
}

#[tokio::test(flavor = "multi_thread")]
async fn generation_ids_never_decrease_across_runs() {
    let ctx = TestContext::new();
    let stream = users_stream("monotonic_users", SyncMode::Append);
    let requests = [
        SyncRequest::new(stream.clone()),
        SyncRequest::soft_reset(stream.clone()),
        SyncRequest::new(stream.clone()),
        SyncRequest::new(stream.clone()),
        SyncRequest::soft_reset(stream.clone()),
    ];

    for (i, request) in requests.into_iter().enumerate() {
        ctx.producer
            .push(&stream.id, user(i as i64, "u", json!(1), 1), at_second(i as i64))
            .await;
        ctx.run(vec![request]).await;
    }

    let generations = ctx.producer.produced_generations(&stream.id).await;
    assert_eq!(generations, vec![0, 1, 1, 1, 2]);
    assert!(generations.windows(2).all(|pair| pair[0] <= pair[1]));
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_before_running_cancels_every_stream() {
    let ctx = TestContext::new();
    let first = users_stream("canceled_a", SyncMode::Append);
    let second = users_stream("canceled_b", SyncMode::AppendDedup);
    let pipeline = ctx.pipeline();
    pipeline.shutdown();

    let report = pipeline
        .run(
            vec![SyncRequest::new(first.clone()), SyncRequest::new(second.clone())],
            ctx.producer.clone(),
        )
        .await
        .unwrap();

    for stream in [&first, &second] {
        let canceled = report.get(&stream.id).unwrap();
        assert_eq!(
            canceled.error.as_ref().map(|err| err.kind()),
            Some(ErrorKind::OperationCanceled)
        );
        assert_eq!(canceled.summary.status_from_source, StreamStatus::Incomplete);
        assert!(canceled.summary.may_have_written_records());
        assert!(ctx.memory.final_rows(&stream.id).await.is_none());
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_during_apply_stops_between_merge_steps() {
    let ctx = TestContext::new();
    let stream = users_stream("interrupted_users", SyncMode::Append);
    for i in 1..=4 {
        ctx.producer
            .push(&stream.id, user(i, "u", json!(1), i), at_second(i))
            .await;
    }
    ctx.destination
        .delay(FETCH_RAW_RECORDS, Duration::from_millis(300))
        .await;

    let pipeline = ctx.pipeline();
    let shutdown_tx = pipeline.shutdown_tx();
    let producer = ctx.producer.clone();
    let request = SyncRequest::new(stream.clone());
    let run = tokio::spawn(async move { pipeline.run(vec![request], producer).await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown_tx.shutdown();

    let report = run.await.unwrap().unwrap();

    let canceled = report.get(&stream.id).unwrap();
    assert_eq!(
        canceled.error.as_ref().map(|err| err.kind()),
        Some(ErrorKind::OperationCanceled)
    );
    // The batch in flight is merged and marked as a whole.
    let rows = ctx.final_rows(&stream.id).await;
    assert_eq!(rows.len(), 2);
    let loaded = ctx
        .memory
        .raw_records(&stream.id)
        .await
        .iter()
        .filter(|record| record.loaded_at.is_some())
        .count();
    assert_eq!(loaded, 2);

    ctx.destination
        .delay(FETCH_RAW_RECORDS, Duration::from_millis(0))
        .await;
    let report = ctx.run(vec![SyncRequest::new(stream.clone())]).await;
    assert!(report.is_success());
    assert_eq!(ctx.final_rows(&stream.id).await.len(), 4);
}

#[tokio::test(flavor = "multi_thread")]
async fn schema_change_rebuilds_the_final_table_from_raw_records() {
    let ctx = TestContext::new();
    let stream = users_stream("evolving_users", SyncMode::AppendDedup);
    ctx.producer
        .push(&stream.id, user(1, "a", json!(1), 1), at_second(1))
        .await;
    ctx.producer
        .push(&stream.id, user(2, "b", json!(1), 1), at_second(2))
        .await;
    ctx.run(vec![SyncRequest::new(stream.clone())]).await;

    let mut evolved = stream.clone();
    evolved
        .columns
        .push(ColumnSchema::new("email", LogicalType::String));
    let report = ctx.run(vec![SyncRequest::new(evolved.clone())]).await;

    assert!(report.is_success());
    let rows = ctx.final_rows(&stream.id).await;
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|row| row.values.len() == 5));
    assert!(rows.iter().all(|row| row.values[4] == Cell::Null));
    assert_eq!(ctx.producer.produced_generations(&stream.id).await, vec![0, 0]);
    assert_eq!(
        report.summary(&stream.id).unwrap().records_written,
        Some(0)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn incomplete_source_status_is_reported() {
    let ctx = TestContext::new();
    let stream = users_stream("partial_users", SyncMode::Append);
    ctx.producer
        .push(&stream.id, user(1, "a", json!(1), 1), at_second(1))
        .await;
    ctx.producer
        .set_status(&stream.id, StreamStatus::Incomplete)
        .await;

    let report = ctx.run(vec![SyncRequest::new(stream.clone())]).await;

    let partial = report.get(&stream.id).unwrap();
    assert!(partial.error.is_none());
    assert_eq!(partial.summary.status_from_source, StreamStatus::Incomplete);
    assert_eq!(partial.summary.records_written, Some(1));
    assert_eq!(ctx.final_rows(&stream.id).await.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn untracked_producers_fall_back_to_the_applied_count() {
    let ctx = TestContext::new();
    let quiet = users_stream("quiet_users", SyncMode::Append);
    let busy = users_stream("busy_users", SyncMode::Append);
    ctx.producer.untracked().await;
    ctx.producer
        .push(&busy.id, user(1, "a", json!(1), 1), at_second(1))
        .await;

    let report = ctx
        .run(vec![SyncRequest::new(quiet.clone()), SyncRequest::new(busy.clone())])
        .await;

    let quiet_summary = report.summary(&quiet.id).unwrap();
    assert_eq!(quiet_summary.records_written, None);
    assert!(quiet_summary.may_have_written_records());
    assert_eq!(report.summary(&busy.id).unwrap().records_written, Some(1));
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_stream_requests_are_rejected() {
    let ctx = TestContext::new();
    let stream = users_stream("twice_users", SyncMode::Append);

    let err = ctx
        .pipeline()
        .run(
            vec![SyncRequest::new(stream.clone()), SyncRequest::soft_reset(stream)],
            ctx.producer.clone(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConfigError);
    assert_eq!(ctx.destination.total_calls().await, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_sync_config_is_rejected() {
    let ctx = TestContext::new();
    let config = SyncConfig {
        apply_batch_size: 0,
        ..test_config()
    };

    let err = ctx
        .pipeline_with_config(config)
        .run(
            vec![SyncRequest::new(users_stream("users", SyncMode::Append))],
            ctx.producer.clone(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConfigError);
}

#[tokio::test(flavor = "multi_thread")]
async fn streams_are_limited_by_the_concurrency_budget() {
    let ctx = TestContext::new();
    let streams: Vec<_> = (0..5)
        .map(|i| users_stream(&format!("bounded_{i}"), SyncMode::Append))
        .collect();
    for stream in &streams {
        ctx.producer
            .push(&stream.id, user(1, "a", json!(1), 1), at_second(1))
            .await;
    }
    let config = SyncConfig {
        max_concurrent_streams: 1,
        ..test_config()
    };

    let report = ctx
        .pipeline_with_config(config)
        .run(
            streams.iter().cloned().map(SyncRequest::new).collect(),
            ctx.producer.clone(),
        )
        .await
        .unwrap();

    assert_eq!(report.len(), 5);
    assert!(report.is_success());
    for stream in &streams {
        assert_eq!(ctx.final_rows(&stream.id).await.len(), 1);
    }
}
