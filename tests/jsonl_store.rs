//! File-backed observation store, alone and behind the dispatcher.
use std::sync::Arc;

use tempfile::TempDir;
use wxrelay::config::TargetsConfig;
use wxrelay::delivery::transport::DisabledTransport;
use wxrelay::delivery::{AttemptStatus, Dispatcher};
use wxrelay::observation::{DisregardReason, ValidatedObservation};
use wxrelay::storage::{JsonlSink, ObservationSink};

mod common;
use common::PacketBuilder;

async fn sink() -> (TempDir, JsonlSink) {
    let dir = TempDir::new().unwrap();
    let data_dir = dir.path().join("data");
    let sink = JsonlSink::new(data_dir.to_str().unwrap()).await.unwrap();
    (dir, sink)
}

#[tokio::test]
async fn accepted_rows_round_trip_with_metadata() {
    let (_dir, sink) = sink().await;
    let obs = common::observation(PacketBuilder::typical());
    sink.insert_accepted(&obs).await.unwrap();
    sink.insert_accepted(&obs).await.unwrap();

    let rows = sink.read_accepted().await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_ne!(rows[0].id, rows[1].id);
    assert_eq!(rows[0].timestamp, obs.timestamp);
    assert_eq!(rows[0].data, obs);
    assert!(rows[0].created_at >= obs.timestamp);
    assert!(sink.read_disregarded().await.unwrap().is_empty());
}

#[tokio::test]
async fn disregarded_rows_keep_reason() {
    let (_dir, sink) = sink().await;
    let record = ValidatedObservation::disregarded(
        common::observation(PacketBuilder::typical().humidity(101)),
        DisregardReason::ImplausibleSensorValues,
    );
    sink.insert_disregarded(&record).await.unwrap();

    let rows = sink.read_disregarded().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].disregard_reason_friendly, "implausible sensor values");
    assert_eq!(rows[0].disregard_reason_detailed, "[]");
    assert!(rows[0].issues().is_empty());
    assert_eq!(rows[0].data.humidity, 101);
    assert!(sink.read_accepted().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_appends_do_not_interleave() {
    let (_dir, sink) = sink().await;
    let sink = Arc::new(sink);
    let obs = common::observation(PacketBuilder::typical());

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..32 {
        let sink = sink.clone();
        let obs = obs.clone();
        tasks.spawn(async move { sink.insert_accepted(&obs).await });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap().unwrap();
    }

    // Every line parses, so no two writes were interleaved
    let rows = sink.read_accepted().await.unwrap();
    assert_eq!(rows.len(), 32);
    let content = std::fs::read_to_string(sink.accepted_path()).unwrap();
    assert_eq!(content.lines().count(), 32);
}

#[tokio::test]
async fn structural_failure_lands_in_disregarded_file() {
    let (_dir, sink) = sink().await;
    let sink = Arc::new(sink);
    let dispatcher = Dispatcher::from_config(
        &TargetsConfig::default(),
        sink.clone(),
        Arc::new(DisabledTransport),
    );

    let broken = ValidatedObservation::accepted(common::observation(
        PacketBuilder::typical().barometer_raw(40_000).uv(3),
    ));
    let reports = dispatcher.deliver(broken).wait().await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].target, "disregarded-store");
    assert_eq!(reports[0].status, AttemptStatus::Succeeded);

    let reports = dispatcher.deliver(common::accepted()).wait().await;
    assert_eq!(reports[0].target, "store");
    assert_eq!(reports[0].status, AttemptStatus::Succeeded);

    let disregarded = sink.read_disregarded().await.unwrap();
    assert_eq!(disregarded.len(), 1);
    assert_eq!(
        disregarded[0].disregard_reason_friendly,
        "failed structural validation"
    );
    let issues = disregarded[0].issues();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].field, "barometer");
    assert_eq!(sink.read_accepted().await.unwrap().len(), 1);
}
