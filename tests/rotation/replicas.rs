//! Peer processes sharing one ring.
//!
//! Scenario:
//!
//! 1. Two `KvRing` instances, standing in for two processes, open the same
//!    ring path on one store.
//! 2. Both watch with the same watcher key.
//!
//! Expected Result:
//!
//! - At most one trigger key exists for the shared key at any time.
//! - Both replicas observe the same rotation.
//! - A replica that joins late picks up where the rotation stands instead
//!   of starting again from the head of the ring.
//! - When one replica leaves, the other keeps the rotation going.

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use lease_ring::path;
use lease_ring::KvRing;
use lease_ring::MemStore;
use lease_ring::Ring;
use lease_ring::RingConfig;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::common::collect_triggers;
use crate::common::setup_ring;
use crate::common::singletons;
use crate::common::TestRing;

fn replica(t: &TestRing) -> KvRing<MemStore> {
    KvRing::new(t.store.clone(), t.ring.path(), RingConfig::default())
}

/// Samples the trigger prefix until `stop` fires and returns the largest
/// number of trigger keys seen at once.
fn track_trigger_keys(
    store: Arc<MemStore>,
    prefix: String,
    stop: CancellationToken,
) -> Arc<AtomicUsize> {
    let most = Arc::new(AtomicUsize::new(0));
    let seen = most.clone();
    tokio::spawn(async move {
        while !stop.is_cancelled() {
            seen.fetch_max(store.keys(&prefix).len(), Ordering::SeqCst);
            sleep(Duration::from_millis(50)).await;
        }
    });
    most
}

#[tokio::test(start_paused = true)]
async fn test_replicas_share_one_trigger() {
    let t = setup_ring("replicas");
    let peer = replica(&t);
    assert_eq!(peer.path(), path("default", "replicas"));
    t.add_all(&["a", "b", "c"]).await;

    let most = track_trigger_keys(t.store.clone(), t.triggers_prefix(), t.ctx.clone());

    let ours = t.ring.watch(&t.ctx, "check", 1, 5, "");
    let theirs = peer.watch(&t.ctx, "check", 1, 5, "");

    let (ours, theirs) = tokio::join!(collect_triggers(&ours, 5), collect_triggers(&theirs, 5));

    let expected = singletons(&["a", "b", "c", "a", "b"]);
    assert_eq!(ours, expected);
    assert_eq!(theirs, expected);
    assert_eq!(most.load(Ordering::SeqCst), 1);
    assert_eq!(t.store.keys(&t.triggers_prefix()).len(), 1);
    t.ctx.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_late_replica_joins_the_rotation_in_progress() {
    let t = setup_ring("late-replica");
    t.add_all(&["a", "b", "c"]).await;

    let ours = t.ring.watch(&t.ctx, "check", 1, 5, "");
    assert_eq!(collect_triggers(&ours, 2).await, singletons(&["a", "b"]));

    let peer = replica(&t);
    let theirs = peer.watch(&t.ctx, "check", 1, 5, "");

    let (ours, theirs) = tokio::join!(collect_triggers(&ours, 2), collect_triggers(&theirs, 2));
    assert_eq!(ours, singletons(&["c", "a"]));
    assert_eq!(theirs, singletons(&["c", "a"]));
    assert_eq!(t.store.keys(&t.triggers_prefix()).len(), 1);
    t.ctx.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_rotation_continues_when_a_replica_leaves() {
    let t = setup_ring("leaving-replica");
    t.add_all(&["a", "b", "c"]).await;

    let leaving = CancellationToken::new();
    let peer = replica(&t);
    let ours = t.ring.watch(&t.ctx, "check", 1, 5, "");
    let theirs = peer.watch(&leaving, "check", 1, 5, "");

    let (ours_first, theirs_first) = tokio::join!(collect_triggers(&ours, 1), collect_triggers(&theirs, 1));
    assert_eq!(ours_first, singletons(&["a"]));
    assert_eq!(theirs_first, singletons(&["a"]));

    leaving.cancel();
    assert_eq!(collect_triggers(&ours, 3).await, singletons(&["b", "c", "a"]));
    assert_eq!(peer.watcher_count(), 0);
    t.ctx.cancel();
}
