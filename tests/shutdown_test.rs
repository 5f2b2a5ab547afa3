//! Tests for graceful shutdown coordination.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::ScriptedTransport;
use reqflow::shutdown::{ShutdownCoordinator, ShutdownResult, ShutdownState};
use reqflow::{HttpMethod, Scheduler, TransportResponse};

#[tokio::test]
async fn test_initial_state_is_running() {
    let coordinator = ShutdownCoordinator::new();
    assert_eq!(coordinator.state(), ShutdownState::Running);
    assert!(coordinator.is_accepting());
}

#[tokio::test]
async fn test_guards_track_in_flight_dispatches() {
    let coordinator = ShutdownCoordinator::new();

    let g1 = coordinator.track();
    let g2 = coordinator.track();
    assert!(g1.is_some() && g2.is_some());
    assert_eq!(coordinator.in_flight_count(), 2);

    drop(g1);
    assert_eq!(coordinator.in_flight_count(), 1);
    drop(g2);
    assert_eq!(coordinator.in_flight_count(), 0);
}

#[tokio::test]
async fn test_track_returns_none_after_initiate() {
    let coordinator = ShutdownCoordinator::new();
    let result = coordinator.initiate(Duration::from_millis(100)).await;

    assert_eq!(result, ShutdownResult::Complete);
    assert_eq!(coordinator.state(), ShutdownState::Stopped);
    assert!(!coordinator.is_accepting());
    assert!(coordinator.track().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_drain_waits_for_guard_release() {
    let coordinator = Arc::new(ShutdownCoordinator::new());
    let guard = coordinator.track();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        drop(guard);
    });

    let result = coordinator.initiate(Duration::from_secs(5)).await;
    assert_eq!(result, ShutdownResult::Complete);
    assert_eq!(coordinator.in_flight_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_shutdown_waits_for_in_flight_send() {
    let transport = ScriptedTransport::slow(TransportResponse::ok("late"), Duration::from_millis(500));
    let scheduler = Scheduler::builder(transport.clone()).build();
    scheduler.start().await.unwrap();

    let ticket = scheduler.enqueue_critical("/purchase", "{}", HttpMethod::Post);
    tokio::task::yield_now().await;

    let result = scheduler.shutdown(Duration::from_secs(5)).await;
    assert_eq!(result, ShutdownResult::Complete);
    assert_eq!(ticket.await.unwrap().body, "late");
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_shutdown_times_out_on_slow_send() {
    let transport = ScriptedTransport::slow(TransportResponse::ok("late"), Duration::from_secs(10));
    let scheduler = Scheduler::builder(transport.clone()).build();
    scheduler.start().await.unwrap();

    let ticket = scheduler.enqueue_critical("/purchase", "{}", HttpMethod::Post);
    tokio::task::yield_now().await;

    let result = scheduler.shutdown(Duration::from_secs(1)).await;
    assert_eq!(result, ShutdownResult::Timeout { remaining: 1 });

    // The dispatch is not aborted and still delivers its outcome.
    assert_eq!(ticket.await.unwrap().body, "late");
    assert_eq!(transport.call_count(), 1);
}
