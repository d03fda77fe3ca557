//! Watcher recovery: store faults, dropped watch streams and shutdown.
//!
//! Transient store errors are absorbed by retries and never reach the
//! caller. A dropped watch stream is reported once as an `Error` event, after
//! which the watcher re-establishes its session and keeps rotating where it
//! left off. Cancelling the caller's context ends the stream with `Closing`.

use std::time::Duration;

use lease_ring::Error;
use lease_ring::EventType;
use lease_ring::Ring;
use lease_ring::StoreError;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::common::collect_triggers;
use crate::common::next_event;
use crate::common::next_trigger;
use crate::common::setup_ring;
use crate::common::singletons;
use crate::common::strings;

#[tokio::test(start_paused = true)]
async fn test_rotation_survives_watch_disconnect() {
    let t = setup_ring("disconnect");
    t.add_all(&["a", "b", "c"]).await;

    let events = t.ring.watch(&t.ctx, "check", 1, 5, "");
    assert_eq!(next_trigger(&events).await, strings(&["a"]));

    t.store.disconnect_watches();

    let error = next_event(&events).await;
    assert_eq!(error.event_type, EventType::Error);
    assert!(matches!(error.err, Some(Error::Store(StoreError::WatchClosed(_)))));

    // the session comes back and picks up the pending trigger
    let triggers = collect_triggers(&events, 3).await;
    assert_eq!(triggers, singletons(&["b", "c", "a"]));
    assert_eq!(t.store.watch_count(), 2);
    t.ctx.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_flapping_watch_restarts_are_rate_limited() {
    let t = setup_ring("flapping");
    t.add_all(&["a"]).await;

    let events = t.ring.watch(&t.ctx, "check", 1, 300, "");
    sleep(Duration::from_millis(100)).await;

    let start = tokio::time::Instant::now();
    for _ in 0..3 {
        t.store.disconnect_watches();
        let error = next_event(&events).await;
        assert_eq!(error.event_type, EventType::Error);
        // let the next session open its watches
        sleep(Duration::from_millis(1)).await;
        while t.store.watch_count() < 2 {
            sleep(Duration::from_millis(100)).await;
        }
    }

    // one restart per second after the initial burst
    assert!(start.elapsed() >= Duration::from_secs(2), "{:?}", start.elapsed());
    t.ctx.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_transient_store_faults_are_absorbed() {
    let t = setup_ring("faults");
    t.add_all(&["a", "b"]).await;

    let events = t.ring.watch(&t.ctx, "check", 1, 5, "");
    assert_eq!(next_trigger(&events).await, strings(&["a"]));

    t.store.fail_next(3, StoreError::Unavailable("leader election".into()));

    let next = next_event(&events).await;
    assert_eq!(next.event_type, EventType::Trigger);
    assert_eq!(next.values, strings(&["b"]));
    assert_eq!(next_trigger(&events).await, strings(&["a"]));
    t.ctx.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_cancel_closes_stream() {
    let t = setup_ring("closing");
    t.add_all(&["a"]).await;

    let ctx = CancellationToken::new();
    let events = t.ring.watch(&ctx, "check", 1, 5, "");
    assert_eq!(next_trigger(&events).await, strings(&["a"]));

    ctx.cancel();
    loop {
        match events.recv().await {
            Some(event) if event.event_type == EventType::Closing => break,
            Some(event) => assert_eq!(event.event_type, EventType::Trigger),
            None => panic!("stream ended without Closing"),
        }
    }
    assert!(events.recv().await.is_none());

    // other callers are unaffected and a fresh watch works straight away
    let again = t.ring.watch(&t.ctx, "check", 1, 5, "");
    assert_eq!(next_trigger(&again).await.len(), 1);
    t.ctx.cancel();
}
