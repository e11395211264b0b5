//! Per-target delivery outcomes do not influence one another.
use std::sync::Arc;

use wxrelay::config::StoreTargetConfig;
use wxrelay::delivery::metoffice::{MetOfficeTarget, WOW_URL};
use wxrelay::delivery::policy::RetryPolicy;
use wxrelay::delivery::store::StoreTarget;
use wxrelay::delivery::windguru::{WindguruTarget, WINDGURU_URL};
use wxrelay::delivery::{AttemptStatus, DeliveryReport, Dispatcher, Target};
use wxrelay::observation::{DisregardReason, ValidatedObservation};

mod common;
use common::{MemorySink, PacketBuilder, Reply, ScriptedTransport};

fn report<'a>(reports: &'a [DeliveryReport], target: &str) -> &'a DeliveryReport {
    reports
        .iter()
        .find(|r| r.target == target)
        .unwrap_or_else(|| panic!("no report for {}", target))
}

fn dispatcher(sink: Arc<MemorySink>, transport: Arc<ScriptedTransport>) -> Dispatcher {
    let targets: Vec<Arc<dyn Target>> = vec![
        Arc::new(StoreTarget::accepted(sink.clone(), &StoreTargetConfig::default())),
        Arc::new(WindguruTarget::new(
            Some("uid".into()),
            Some("pw".into()),
            transport.clone(),
            RetryPolicy::windguru(),
        )),
        Arc::new(MetOfficeTarget::new(
            Some("site".into()),
            Some("key".into()),
            "wxrelay test",
            transport,
            RetryPolicy::metoffice(),
        )),
    ];
    Dispatcher::new(targets, Arc::new(StoreTarget::disregarded(sink)))
}

#[tokio::test(start_paused = true)]
async fn failures_stay_with_their_target() {
    let sink = MemorySink::new();
    let transport = ScriptedTransport::new();
    transport.script(
        WINDGURU_URL,
        vec![
            Reply::Status(500, "oops"),
            Reply::Status(500, "oops"),
            Reply::Status(500, "oops"),
            Reply::Status(200, "OK"),
        ],
    );
    transport.script(WOW_URL, vec![Reply::Status(429, "slow down")]);

    let started = tokio::time::Instant::now();
    let handle = dispatcher(sink.clone(), transport.clone()).deliver(common::accepted());
    assert!(handle.skipped().is_empty());
    let reports = handle.wait().await;
    assert_eq!(reports.len(), 3);

    let windguru = report(&reports, "windguru");
    assert_eq!(windguru.status, AttemptStatus::Succeeded);
    assert_eq!(windguru.attempts, 4);
    assert_eq!(
        windguru
            .history
            .iter()
            .filter(|s| **s == AttemptStatus::Retrying)
            .count(),
        3
    );
    // 60 s, 120 s, 240 s of backoff
    assert!(started.elapsed() >= std::time::Duration::from_secs(420));

    let metoffice = report(&reports, "metoffice");
    assert_eq!(metoffice.status, AttemptStatus::FailedNonRetryable);
    assert_eq!(metoffice.attempts, 1);
    assert_eq!(transport.calls_to(WOW_URL), 1);

    let store = report(&reports, "store");
    assert_eq!(store.status, AttemptStatus::Succeeded);
    assert_eq!(store.attempts, 1);
    assert_eq!(sink.accepted.lock().unwrap().len(), 1);
    assert!(sink.disregarded.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failing_store_does_not_hold_back_uploads() {
    let sink = MemorySink::failing();
    let transport = ScriptedTransport::new();
    transport.script(WINDGURU_URL, vec![Reply::Status(200, "OK")]);
    transport.script(WOW_URL, vec![Reply::Status(200, "{}")]);

    let reports = dispatcher(sink, transport).deliver(common::accepted()).wait().await;
    assert_eq!(report(&reports, "windguru").status, AttemptStatus::Succeeded);
    assert_eq!(report(&reports, "metoffice").status, AttemptStatus::Succeeded);
    let store = report(&reports, "store");
    assert_eq!(store.status, AttemptStatus::FailedExhausted);
    assert_eq!(store.attempts, 31);
}

#[tokio::test(start_paused = true)]
async fn transport_errors_are_retried_until_exhausted() {
    let sink = MemorySink::new();
    let transport = ScriptedTransport::new();
    transport.script(WINDGURU_URL, vec![Reply::ConnectError]);
    transport.script(WOW_URL, vec![Reply::Status(200, "{}")]);

    let reports = dispatcher(sink, transport.clone())
        .deliver(common::accepted())
        .wait()
        .await;
    let windguru = report(&reports, "windguru");
    assert_eq!(windguru.status, AttemptStatus::FailedExhausted);
    assert_eq!(windguru.attempts, 11);
    assert_eq!(transport.calls_to(WINDGURU_URL), 11);
    assert!(windguru.last_error.as_ref().unwrap().is_retryable());
}

#[tokio::test(start_paused = true)]
async fn disregarded_record_gets_one_store_attempt_only() {
    let sink = MemorySink::new();
    let transport = ScriptedTransport::new();
    let record = ValidatedObservation::disregarded(
        common::observation(PacketBuilder::typical().wind_direction(400)),
        DisregardReason::WindDirectionOutOfRange,
    );

    let reports = dispatcher(sink.clone(), transport.clone())
        .deliver(record)
        .wait()
        .await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].target, "disregarded-store");
    assert_eq!(reports[0].status, AttemptStatus::Succeeded);
    assert_eq!(transport.total_calls(), 0);
    let stored = sink.disregarded.lock().unwrap();
    assert_eq!(stored[0].reason_text(), "wind direction out of range");
}

#[tokio::test(start_paused = true)]
async fn lost_disregard_write_is_not_retried() {
    let sink = MemorySink::failing();
    let record = ValidatedObservation::disregarded(
        common::observation(PacketBuilder::typical().wind_speed(255).humidity(255)),
        DisregardReason::ConsoleInSetupMode,
    );
    let reports = dispatcher(sink, ScriptedTransport::new())
        .deliver(record)
        .wait()
        .await;
    assert_eq!(reports[0].status, AttemptStatus::FailedExhausted);
    assert_eq!(reports[0].attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn structurally_broken_record_is_rerouted() {
    let sink = MemorySink::new();
    let transport = ScriptedTransport::new();
    let record = ValidatedObservation::accepted(common::observation(
        PacketBuilder::typical().barometer_raw(0),
    ));

    let reports = dispatcher(sink.clone(), transport.clone())
        .deliver(record)
        .wait()
        .await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].target, "disregarded-store");
    assert_eq!(transport.total_calls(), 0);
    let stored = sink.disregarded.lock().unwrap();
    assert_eq!(stored[0].reason_text(), "failed structural validation");
    assert_eq!(stored[0].structural_errors[0].field, "barometer");
}
