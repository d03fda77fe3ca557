//! Ring membership: adding, refreshing, removing and expiring items, and how
//! rotation reacts to each.

use std::time::Duration;

use lease_ring::Error;
use lease_ring::EventType;
use lease_ring::Ring;
use lease_ring::ValidationError;
use tokio::time::sleep;
use tokio::time::timeout;

use crate::common::collect_triggers;
use crate::common::next_event;
use crate::common::next_trigger;
use crate::common::setup_ring;
use crate::common::singletons;
use crate::common::strings;
use crate::common::KEEPALIVE_SECS;

#[tokio::test(start_paused = true)]
async fn test_keepalive_floor() {
    let t = setup_ring("keepalive-floor");

    for keepalive in [i64::MIN, -5, 0, 1, 4, 5] {
        let result = t.ring.add(&t.ctx, "mulder", keepalive).await;
        assert!(
            matches!(
                result,
                Err(Error::Validation(ValidationError::KeepaliveTooShort { .. }))
            ),
            "keepalive {keepalive} was accepted"
        );
    }
    assert!(t.ring.is_empty(&t.ctx).await.unwrap());

    for keepalive in [6, 60, KEEPALIVE_SECS] {
        t.ring.add(&t.ctx, "mulder", keepalive).await.unwrap();
    }
    assert_eq!(t.ring.members(&t.ctx).await.unwrap(), strings(&["mulder"]));
}

#[tokio::test(start_paused = true)]
async fn test_idempotent_add_keeps_rotation() {
    let t = setup_ring("idempotent");
    t.add_all(&["a", "b", "c"]).await;
    t.add_all(&["a", "b", "c"]).await;
    assert_eq!(t.ring.members(&t.ctx).await.unwrap(), strings(&["a", "b", "c"]));

    let events = t.ring.watch(&t.ctx, "check", 1, 5, "");
    let first = collect_triggers(&events, 2).await;

    // refresh everything mid-rotation
    t.add_all(&["c", "a", "b"]).await;
    let rest = collect_triggers(&events, 3).await;

    assert_eq!(first, singletons(&["a", "b"]));
    assert_eq!(rest, singletons(&["c", "a", "b"]));
    t.ctx.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_remove_short_circuits_rotation() {
    let t = setup_ring("remove");
    t.add_all(&["mulder", "scully", "skinner"]).await;

    let events = t.ring.watch(&t.ctx, "check", 1, 5, "");
    assert_eq!(collect_triggers(&events, 2).await, singletons(&["mulder", "scully"]));

    t.ring.remove(&t.ctx, "skinner").await.unwrap();
    let removed = next_event(&events).await;
    assert_eq!(removed.event_type, EventType::Remove);
    assert_eq!(removed.values, strings(&["skinner"]));

    assert_eq!(next_trigger(&events).await, strings(&["mulder"]));
    assert_eq!(next_trigger(&events).await, strings(&["scully"]));
    t.ctx.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_empty_ring_waits_for_first_item() {
    let t = setup_ring("empty");
    assert!(t.ring.is_empty(&t.ctx).await.unwrap());

    let events = t.ring.watch(&t.ctx, "check", 1, 5, "");

    // nothing happens while the ring stays empty
    assert!(timeout(Duration::from_secs(60), events.recv()).await.is_err());
    assert!(t.store.keys(&t.triggers_prefix()).is_empty());

    t.add_all(&["mulder"]).await;

    let added = next_event(&events).await;
    assert_eq!(added.event_type, EventType::Add);
    assert_eq!(added.values, strings(&["mulder"]));

    let trigger = next_event(&events).await;
    assert_eq!(trigger.event_type, EventType::Trigger);
    assert_eq!(trigger.values, strings(&["mulder"]));
    assert!(trigger.err.is_none());

    // exactly one trigger per interval
    assert!(timeout(Duration::from_secs(4), events.recv()).await.is_err());
    t.ctx.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_expired_item_leaves_rotation() {
    let t = setup_ring("expiry");
    t.add_all(&["a", "c"]).await;
    t.ring.add(&t.ctx, "b", 12).await.unwrap();

    let events = t.ring.watch(&t.ctx, "check", 1, 5, "");
    assert_eq!(next_trigger(&events).await, strings(&["a"]));

    // b's lease runs out at t=12, between the second and third trigger
    let mut seen = Vec::new();
    let mut removed = false;
    while seen.len() < 4 {
        let event = next_event(&events).await;
        match event.event_type {
            EventType::Trigger => seen.push(event.values[0].clone()),
            EventType::Remove => {
                assert_eq!(event.values, strings(&["b"]));
                removed = true;
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    assert!(removed);
    assert_eq!(seen, strings(&["b", "c", "a", "c"]));
    t.ctx.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_ring_empties_and_refills() {
    let t = setup_ring("refill");
    t.add_all(&["a"]).await;

    let events = t.ring.watch(&t.ctx, "check", 1, 5, "");
    assert_eq!(next_trigger(&events).await, strings(&["a"]));

    t.ring.remove(&t.ctx, "a").await.unwrap();
    assert_eq!(next_event(&events).await.event_type, EventType::Remove);
    // the pending trigger expires with nothing left to deliver
    sleep(Duration::from_secs(10)).await;
    while let Ok(Some(event)) = timeout(Duration::from_millis(1), events.recv()).await {
        assert_ne!(event.event_type, EventType::Error);
    }
    assert!(t.store.keys(&t.triggers_prefix()).is_empty());

    t.add_all(&["z"]).await;
    assert_eq!(next_trigger(&events).await, strings(&["z"]));
    t.ctx.cancel();
}
