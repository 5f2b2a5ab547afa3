//! End-to-end scheduler tests through the public API.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

use common::ScriptedTransport;
use reqflow::network::ManualNetworkMonitor;
use reqflow::scheduler::{
    AdaptiveBatchingStrategy, PriorityAwareBatchingStrategy, RequestConfig, TimeBasedBatchingStrategy,
};
use reqflow::storage::FilePersistence;
use reqflow::{
    CallError, FailureKind, HttpMethod, Priority, Route, RouteDescriptor, Scheduler, TransportResponse,
};

#[derive(Debug, Serialize)]
struct ScoreEntry {
    player: String,
    score: u32,
}

#[derive(Debug, Deserialize, PartialEq)]
struct Leaderboard {
    rank: u32,
}

struct SubmitScore;

impl Route for SubmitScore {
    type Request = ScoreEntry;
    type Response = Leaderboard;

    fn descriptor() -> RouteDescriptor {
        RouteDescriptor::new("/scores", HttpMethod::Post, Priority::High).retries(0, Duration::from_millis(100))
    }
}

fn entry() -> ScoreEntry {
    ScoreEntry { player: "ada".into(), score: 1200 }
}

#[tokio::test(start_paused = true)]
async fn test_typed_route_round_trip() {
    let transport = ScriptedTransport::always(TransportResponse::ok(r#"{"rank":3}"#));
    let scheduler = Scheduler::builder(transport.clone()).build();
    scheduler.start().await.unwrap();

    let board = scheduler.call::<SubmitScore>(&entry()).await.unwrap();
    assert_eq!(board, Leaderboard { rank: 3 });

    let calls = transport.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].request.url, "/scores");
    assert_eq!(calls[0].request.method, HttpMethod::Post);
    let body: Value = serde_json::from_str(&calls[0].request.body).unwrap();
    assert_eq!(body["player"], "ada");
    assert_eq!(body["score"], 1200);

    scheduler.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test(start_paused = true)]
async fn test_typed_route_reports_decode_and_request_errors() {
    let transport = ScriptedTransport::new(
        vec![TransportResponse::ok("not json")],
        TransportResponse::from_status(404, "missing"),
    );
    let scheduler = Scheduler::builder(transport.clone()).build();
    scheduler.start().await.unwrap();

    let err = scheduler.call::<SubmitScore>(&entry()).await.unwrap_err();
    assert!(matches!(err, CallError::Decode(_)));

    let err = scheduler
        .call::<SubmitScore>(&ScoreEntry { player: "bob".into(), score: 1 })
        .await
        .unwrap_err();
    match err {
        CallError::Request(failure) => {
            assert_eq!(failure.kind, FailureKind::Client);
            assert_eq!(failure.status, 404);
        }
        other => panic!("expected request failure, got {other:?}"),
    }
    assert_eq!(transport.call_count(), 2);

    scheduler.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test(start_paused = true)]
async fn test_enqueue_json_serializes_payload() {
    let transport = ScriptedTransport::always(TransportResponse::ok("{}"));
    let scheduler = Scheduler::builder(transport.clone()).build();
    scheduler.start().await.unwrap();

    let config = Arc::new(RequestConfig::for_priority(Priority::High));
    let ticket = scheduler.enqueue_json("/scores", &entry(), HttpMethod::Put, config).unwrap();
    tokio_test::assert_ok!(ticket.await);

    let calls = transport.calls();
    assert_eq!(calls[0].request.method, HttpMethod::Put);
    assert_eq!(calls[0].request.body, r#"{"player":"ada","score":1200}"#);

    scheduler.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test(start_paused = true)]
async fn test_adaptive_strategy_learns_from_batch_outcomes() {
    let transport = ScriptedTransport::new(
        vec![TransportResponse::ok("[1,2,3]")],
        TransportResponse::from_status(500, "boom"),
    );
    let scheduler = Scheduler::builder(transport.clone()).build();
    let adaptive = Arc::new(AdaptiveBatchingStrategy::new(10, Duration::from_secs(2)));
    scheduler.register_batching_strategy("/telemetry", adaptive.clone());
    scheduler.start().await.unwrap();

    let tickets: Vec<_> = (0..3)
        .map(|i| scheduler.enqueue_with_priority("/telemetry", format!(r#"{{"e":{i}}}"#), HttpMethod::Post, Priority::Low))
        .collect();
    for ticket in tickets {
        tokio_test::assert_ok!(ticket.await);
    }

    let snapshot = adaptive.snapshot();
    assert_eq!(snapshot.successful_batches, 1);
    assert_eq!(snapshot.failed_batches, 0);
    assert_eq!(transport.urls(), vec!["/telemetry/batch"]);

    scheduler.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test(start_paused = true)]
async fn test_priority_aware_batch_waits_for_priority_delay() {
    let transport = ScriptedTransport::always(TransportResponse::ok("[\"ok\"]"));
    let scheduler = Scheduler::builder(transport.clone()).build();
    scheduler.register_priority_batching_strategy(
        Priority::Low,
        Arc::new(PriorityAwareBatchingStrategy::new(50, Duration::from_secs(30))),
    );
    scheduler.start().await.unwrap();

    let started = Instant::now();
    let ticket = scheduler.enqueue_with_priority("/events", r#"{"k":1}"#, HttpMethod::Post, Priority::Low);
    assert_eq!(ticket.await.unwrap().body, "ok");

    let waited = transport.calls()[0].at - started;
    assert!(waited >= Duration::from_secs(5));
    assert!(waited < Duration::from_secs(6));

    scheduler.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test(start_paused = true)]
async fn test_batch_wire_failure_fails_every_member() {
    let transport = ScriptedTransport::always(TransportResponse::from_status(400, "bad batch"));
    let scheduler = Scheduler::builder(transport.clone()).build();
    scheduler.register_batching_strategy(
        "/events",
        Arc::new(TimeBasedBatchingStrategy::new(20, Duration::from_secs(1))),
    );
    scheduler.start().await.unwrap();

    let config = Arc::new(RequestConfig { max_retries: 0, ..RequestConfig::for_priority(Priority::Low) });
    let a = scheduler.enqueue("/events", r#"{"n":1}"#, HttpMethod::Post, config.clone());
    let b = scheduler.enqueue("/events", r#"{"n":2}"#, HttpMethod::Post, config);

    for ticket in [a, b] {
        let failure = ticket.await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::Client);
        assert_eq!(failure.status, 400);
    }
    assert_eq!(transport.call_count(), 1);

    scheduler.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test(start_paused = true)]
async fn test_statistics_serialize_to_json() {
    let scheduler = Scheduler::builder(ScriptedTransport::always(TransportResponse::ok("{}"))).build();
    let _queued = scheduler.enqueue_with_priority("/a", "{}", HttpMethod::Get, Priority::High);

    let json = serde_json::to_value(scheduler.statistics()).unwrap();
    assert_eq!(json["queued"], 1);
    assert_eq!(json["online"], true);
    assert!(json["timestamp"].is_string());
}

#[tokio::test]
async fn test_offline_queue_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let transport = ScriptedTransport::always(TransportResponse::ok("{}"));

    let monitor = Arc::new(ManualNetworkMonitor::new(false));
    let first = Scheduler::builder(transport.clone())
        .network(monitor)
        .persistence(Arc::new(FilePersistence::new(dir.path())))
        .build();
    first.start().await.unwrap();

    let _a = first.enqueue_with_priority("/save", r#"{"slot":1}"#, HttpMethod::Post, Priority::High);
    let _b = first.enqueue_with_priority("/save", r#"{"slot":2}"#, HttpMethod::Post, Priority::High);

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while first.offline_store().count().await.unwrap() < 2 {
        assert!(std::time::Instant::now() < deadline, "requests were never mirrored");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    first.shutdown(Duration::from_secs(1)).await;
    drop(first);
    assert_eq!(transport.call_count(), 0);

    let second = Scheduler::builder(transport.clone())
        .persistence(Arc::new(FilePersistence::new(dir.path())))
        .build();
    second.start().await.unwrap();
    assert_eq!(second.offline_store().count().await.unwrap(), 0);

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while transport.call_count() < 2 {
        assert!(std::time::Instant::now() < deadline, "replayed requests were never sent");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let bodies: Vec<_> = transport.calls().into_iter().map(|c| c.request.body).collect();
    assert_eq!(bodies, vec![r#"{"slot":1}"#, r#"{"slot":2}"#]);

    second.shutdown(Duration::from_secs(1)).await;
}
