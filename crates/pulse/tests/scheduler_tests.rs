mod common;

use common::{advance, endpoint, millis, secs, start, start_with};
use pulse::{
    EndpointState, OperationalFault, RegistryEvent, SchedulerConfig, SchedulerError,
};
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_first_probe_waits_one_interval() {
    let h = start(4);
    h.handle.register(endpoint(1, 30)).await.unwrap();

    advance(secs(30) - millis(1)).await;
    assert!(h.prober.calls().is_empty());

    advance(millis(10)).await;
    assert_eq!(h.prober.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_log_count_tracks_interval() {
    let h = start(4);
    h.handle.register(endpoint(1, 10)).await.unwrap();

    advance(secs(105)).await;
    let logs = h.store.logs_for(1).len();
    assert!((9..=11).contains(&logs), "expected about 10 logs, got {logs}");
}

#[tokio::test(start_paused = true)]
async fn test_minute_interval_then_deactivate() {
    let h = start(4);
    h.prober.set_latency(1, millis(50));
    let registered = Instant::now();
    h.handle.register(endpoint(1, 60)).await.unwrap();

    advance(secs(130)).await;
    h.handle.deactivate(1).await.unwrap();

    let logs = h.store.logs_for(1);
    assert_eq!(logs.len(), 2);
    assert!(logs.iter().all(|log| log.success && log.status_code == Some(200)));

    let calls = h.prober.calls_for(1);
    assert_eq!(calls[0].started - registered, secs(60));
    let second = calls[1].started - registered;
    assert!(second >= secs(120) + millis(50) && second < secs(121), "second probe at {second:?}");

    advance(secs(600)).await;
    assert_eq!(h.store.logs_for(1).len(), 2);
    assert_eq!(h.handle.state_of(1).await.unwrap(), EndpointState::Unscheduled);
}

#[tokio::test(start_paused = true)]
async fn test_failing_target_keeps_cadence() {
    let h = start(4);
    h.prober.set_latency(1, millis(50));
    h.handle.register(endpoint(1, 60)).await.unwrap();

    advance(secs(90)).await;
    h.prober.set_status(1, 500);
    advance(secs(100)).await;

    let logs = h.store.logs_for(1);
    assert_eq!(logs.len(), 3);
    assert!(logs[0].success);
    for log in &logs[1..] {
        assert!(!log.success);
        assert_eq!(log.status_code, Some(500));
        assert_eq!(log.error_message.as_deref(), Some("expected 200, got 500"));
    }
}

#[tokio::test(start_paused = true)]
async fn test_unregister_during_probe_allows_one_more_log() {
    let h = start(4);
    h.prober.set_latency(1, secs(5));
    h.handle.register(endpoint(1, 10)).await.unwrap();

    advance(secs(12)).await;
    assert_eq!(h.handle.state_of(1).await.unwrap(), EndpointState::Probing);
    assert!(h.handle.unregister(1).await.unwrap());
    let before = h.store.logs_for(1).len();

    advance(secs(60)).await;
    assert_eq!(h.store.logs_for(1).len(), before + 1);
    assert_eq!(h.prober.calls_for(1).len(), 1);

    // Idempotent
    assert!(!h.handle.unregister(1).await.unwrap());
    let stats = h.handle.stats().await.unwrap();
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.invariant_violations, 0);
}

#[tokio::test(start_paused = true)]
async fn test_reconfigure_rebases_on_last_completion() {
    let h = start(4);
    let registered = Instant::now();
    h.handle.register(endpoint(1, 60)).await.unwrap();

    advance(secs(65)).await;
    assert_eq!(h.prober.calls_for(1).len(), 1);

    // Shorter: next probe at last completion (60) + 10
    h.handle.reconfigure(1, 10).await.unwrap();
    assert_eq!(h.prober.calls_for(1).len(), 1, "reconfigure must not probe immediately");
    advance(secs(10)).await;
    let calls = h.prober.calls_for(1);
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].started - registered, secs(70));

    // Longer: next probe at last completion (70) + 100
    h.handle.reconfigure(1, 100).await.unwrap();
    advance(secs(85)).await;
    assert_eq!(h.prober.calls_for(1).len(), 2);
    advance(secs(15)).await;
    let calls = h.prober.calls_for(1);
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[2].started - registered, secs(170));
}

#[tokio::test(start_paused = true)]
async fn test_overdue_after_reconfigure_fires_without_extra_probe() {
    let h = start(4);
    h.handle.register(endpoint(1, 60)).await.unwrap();

    advance(secs(45)).await;
    // Registration (0) + 30 is already past
    h.handle.reconfigure(1, 30).await.unwrap();
    advance(millis(1)).await;
    assert_eq!(h.prober.calls_for(1).len(), 1);

    advance(secs(20)).await;
    assert_eq!(h.prober.calls_for(1).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_target_never_overlaps_itself() {
    let h = start(4);
    h.prober.set_latency(1, secs(5));
    h.handle.register(endpoint(1, 2)).await.unwrap();

    advance(secs(60)).await;

    assert_eq!(h.prober.max_per_endpoint(), 1);
    let calls = h.prober.calls_for(1);
    assert!(calls.len() >= 7, "got {} probes", calls.len());
    for pair in calls.windows(2) {
        assert!(pair[1].started - pair[0].started >= secs(7));
    }
}

#[tokio::test(start_paused = true)]
async fn test_reregister_waits_for_previous_attempt() {
    let h = start(4);
    h.prober.set_latency(1, secs(15));
    let registered = Instant::now();
    h.handle.register(endpoint(1, 10)).await.unwrap();

    advance(secs(12)).await;
    h.handle.unregister(1).await.unwrap();
    h.handle.register(endpoint(1, 10)).await.unwrap();

    // Due at 22 while the first attempt runs until 25
    advance(secs(11)).await;
    assert_eq!(h.handle.state_of(1).await.unwrap(), EndpointState::AwaitingPrevious);

    advance(secs(3)).await;
    let calls = h.prober.calls_for(1);
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].started - registered, secs(25));
    assert_eq!(h.prober.max_per_endpoint(), 1);
    assert_eq!(h.store.logs_for(1).len(), 1);
    assert_eq!(h.handle.stats().await.unwrap().invariant_violations, 0);
}

#[tokio::test(start_paused = true)]
async fn test_saturated_pool_defers_without_dropping() {
    let h = start(1);
    for id in 1..=5 {
        h.prober.set_latency(id, secs(1));
        h.handle.register(endpoint(id, 10)).await.unwrap();
    }

    advance(secs(60)).await;

    assert_eq!(h.prober.max_total(), 1);
    for id in 1..=5 {
        let logs = h.store.logs_for(id).len();
        assert!(logs >= 3, "endpoint {id} only logged {logs} times");
    }
    let stats = h.handle.stats().await.unwrap();
    assert!(stats.deferred >= 4);
    assert_eq!(stats.logs_dropped, 0);
    assert_eq!(stats.scheduled, 5);
}

#[tokio::test(start_paused = true)]
async fn test_ready_queue_is_fifo() {
    let h = start(1);
    for id in [3, 1, 2] {
        h.prober.set_latency(id, secs(1));
        h.handle.register(endpoint(id, 10)).await.unwrap();
    }

    advance(secs(14)).await;
    let order: Vec<_> = h.prober.calls().iter().map(|call| call.endpoint_id).collect();
    assert_eq!(order, vec![3, 1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_log_write_retried_then_dropped_with_fault() {
    let h = start(4);
    h.handle.register(endpoint(1, 10)).await.unwrap();

    h.store.fail_next(2);
    advance(secs(11)).await;
    assert_eq!(h.store.logs_for(1).len(), 1);
    assert_eq!(h.store.attempts(), 3);
    assert!(h.faults.faults().is_empty());

    h.store.set_unavailable(true);
    advance(secs(10)).await;
    assert_eq!(h.store.logs_for(1).len(), 1);
    let stats = h.handle.stats().await.unwrap();
    assert_eq!(stats.logs_written, 1);
    assert_eq!(stats.logs_dropped, 1);
    assert_eq!(
        h.faults.faults(),
        vec![OperationalFault::LogWriteFailed {
            endpoint_id: 1,
            attempts: 3,
            error: "store unavailable: injected outage".to_string(),
        }]
    );

    // Probing goes on once the store is back
    h.store.set_unavailable(false);
    advance(secs(10)).await;
    assert_eq!(h.store.logs_for(1).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_panicking_attempt_is_counted_and_rescheduled() {
    let h = start(4);
    h.prober.panic_next(1, 1);
    let registered = Instant::now();
    h.handle.register(endpoint(1, 10)).await.unwrap();

    advance(secs(35)).await;

    let calls = h.prober.calls_for(1);
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[1].started - registered, secs(20));
    assert_eq!(calls[2].started - registered, secs(30));
    assert_eq!(h.store.logs_for(1).len(), 2);

    let stats = h.handle.stats().await.unwrap();
    assert_eq!(stats.invariant_violations, 1);
    assert_eq!(stats.dispatched, stats.completed);
    assert_eq!(
        h.faults.faults(),
        vec![OperationalFault::InvariantViolation {
            endpoint_id: 1,
            detail: "probe task panicked".to_string(),
        }]
    );
    assert!(matches!(h.handle.state_of(1).await.unwrap(), EndpointState::Scheduled { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_delete_is_terminal() {
    let h = start(4);
    h.handle.register(endpoint(1, 10)).await.unwrap();
    h.handle.delete(1).await.unwrap();

    assert_eq!(h.handle.register(endpoint(1, 10)).await, Err(SchedulerError::Deleted(1)));
    h.handle.apply(RegistryEvent::Created(endpoint(1, 10))).await.unwrap();
    assert_eq!(h.handle.state_of(1).await.unwrap(), EndpointState::Deleted);

    advance(secs(60)).await;
    assert!(h.prober.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_invalid_endpoints_are_rejected() {
    let h = start(4);

    let err = h.handle.register(endpoint(1, 0)).await.unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidEndpoint { id: 1, .. }));

    let mut bad_url = endpoint(2, 10);
    bad_url.url = "ftp://probe.test".to_string();
    assert!(h.handle.register(bad_url).await.is_err());

    assert_eq!(h.handle.reconfigure(3, 10).await, Err(SchedulerError::NotScheduled(3)));

    h.handle.register(endpoint(4, 10)).await.unwrap();
    assert!(matches!(
        h.handle.reconfigure(4, 0).await,
        Err(SchedulerError::InvalidEndpoint { id: 4, .. })
    ));
    assert_eq!(h.handle.stats().await.unwrap().scheduled, 1);
}

#[tokio::test(start_paused = true)]
async fn test_registry_events_drive_lifecycle() {
    let h = start(4);
    h.handle.apply(RegistryEvent::Created(endpoint(1, 10))).await.unwrap();
    assert!(matches!(h.handle.state_of(1).await.unwrap(), EndpointState::Scheduled { .. }));

    let mut moved = endpoint(1, 10);
    moved.url = "http://probe.test/moved".to_string();
    h.handle.apply(RegistryEvent::Updated(moved.clone())).await.unwrap();
    advance(secs(11)).await;
    assert_eq!(h.prober.calls_for(1)[0].url, "http://probe.test/moved");

    let mut paused = moved.clone();
    paused.is_active = false;
    h.handle.apply(RegistryEvent::Updated(paused.clone())).await.unwrap();
    assert_eq!(h.handle.state_of(1).await.unwrap(), EndpointState::Unscheduled);

    h.handle.apply(RegistryEvent::Activated(moved.clone())).await.unwrap();
    assert!(matches!(h.handle.state_of(1).await.unwrap(), EndpointState::Scheduled { .. }));

    // Replayed creation of a known endpoint acts as an update
    h.handle.apply(RegistryEvent::Created(moved.clone())).await.unwrap();
    assert_eq!(h.handle.stats().await.unwrap().scheduled, 1);

    h.handle.apply(RegistryEvent::Deactivated(paused)).await.unwrap();
    assert_eq!(h.handle.state_of(1).await.unwrap(), EndpointState::Unscheduled);

    h.handle.apply(RegistryEvent::Deleted(1)).await.unwrap();
    assert_eq!(h.handle.state_of(1).await.unwrap(), EndpointState::Deleted);
}

#[tokio::test(start_paused = true)]
async fn test_created_at_strictly_increasing() {
    let h = start(4);
    h.handle.register(endpoint(1, 1)).await.unwrap();

    advance(secs(30)).await;
    let logs = h.store.logs_for(1);
    assert!(logs.len() >= 25);
    for pair in logs.windows(2) {
        assert!(pair[1].created_at > pair[0].created_at);
    }
}

#[tokio::test(start_paused = true)]
async fn test_stats_account_for_every_probe() {
    let h = start(4);
    h.handle.register(endpoint(1, 5)).await.unwrap();
    h.handle.register(endpoint(2, 7)).await.unwrap();

    advance(secs(36)).await;
    let stats = h.handle.stats().await.unwrap();
    assert_eq!(stats.scheduled, 2);
    assert_eq!(stats.dispatched, stats.completed);
    assert_eq!(stats.logs_written, stats.completed);
    assert_eq!(stats.logs_written as usize, h.store.logs().len());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_waits_for_in_flight_probe() {
    let h = start(4);
    h.prober.set_latency(1, secs(3));
    h.handle.register(endpoint(1, 10)).await.unwrap();

    advance(secs(11)).await;
    h.handle.shutdown().await.unwrap();
    assert_eq!(h.store.logs_for(1).len(), 1);
    h.task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_aborts_after_grace() {
    let h = start_with(SchedulerConfig {
        workers: 4,
        shutdown_grace: secs(2),
        ..SchedulerConfig::default()
    });
    h.prober.set_latency(1, secs(120));
    h.handle.register(endpoint(1, 10)).await.unwrap();

    advance(secs(11)).await;
    let started = Instant::now();
    h.handle.shutdown().await.unwrap();
    assert!(started.elapsed() <= secs(3));
    assert!(h.store.logs_for(1).is_empty());
    h.task.await.unwrap();

    assert_eq!(h.handle.register(endpoint(2, 10)).await, Err(SchedulerError::Closed));
}
