//! Cadence floor.
//!
//! Neither a cron schedule firing every second nor a ring default below the
//! floor may make a trigger fire more often than every 5 seconds.

use std::time::Duration;

use lease_ring::parse_cron;
use lease_ring::Ring;
use lease_ring::RingStore;
use tokio::time::sleep;
use tokio::time::Instant;

use crate::common::collect_triggers;
use crate::common::setup_ring;

#[tokio::test(start_paused = true)]
async fn test_every_second_cron_is_floored() {
    let t = setup_ring("cron-floor");
    t.add_all(&["a", "b", "c"]).await;

    let events = t.ring.watch(&t.ctx, "check", 1, 0, "* * * * * *");
    collect_triggers(&events, 1).await;

    let start = Instant::now();
    collect_triggers(&events, 2).await;
    assert!(start.elapsed() >= Duration::from_secs(10));

    let triggers = t.store.keys(&t.triggers_prefix());
    assert_eq!(triggers.len(), 1);
    let trigger = t.store.get(&triggers[0]).await.unwrap().unwrap();
    let ttl = t
        .store
        .time_to_live(trigger.lease.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ttl.granted, 5);
    t.ctx.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_default_cadence_applies_to_watchers_without_their_own() {
    let t = setup_ring("default-cadence");
    t.add_all(&["a", "b"]).await;
    t.ring.set_interval(20).unwrap();

    let events = t.ring.watch(&t.ctx, "check", 1, 0, "");
    sleep(Duration::from_millis(100)).await;

    let triggers = t.store.keys(&t.triggers_prefix());
    assert_eq!(triggers.len(), 1);
    let trigger = t.store.get(&triggers[0]).await.unwrap().unwrap();
    let ttl = t
        .store
        .time_to_live(trigger.lease.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ttl.granted, 20);

    // every-second cron as the ring default is floored as well
    t.ring.set_cron(parse_cron("* * * * * *").unwrap());
    collect_triggers(&events, 1).await;
    let start = Instant::now();
    collect_triggers(&events, 1).await;
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(5) && elapsed < Duration::from_secs(6), "{elapsed:?}");
    t.ctx.cancel();
}
