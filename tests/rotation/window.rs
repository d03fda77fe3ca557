//! Multi-item windows.
//!
//! Scenario:
//!
//! 1. Register `byers, frohike, mulder, scully, skinner` in that order.
//! 2. Watch the ring with `items = 3`.
//!
//! Expected Result:
//!
//! - The first trigger delivers `byers, frohike, mulder`.
//! - The second delivers `scully, skinner, byers`, wrapping around the ring.
//! - A ring smaller than the window repeats its items to fill it, and every
//!   later window starts from the same item again.

use lease_ring::Ring;

use crate::common::collect_triggers;
use crate::common::setup_ring;
use crate::common::strings;

#[tokio::test(start_paused = true)]
async fn test_window_advances_by_item_count() {
    let t = setup_ring("window");
    t.add_all(&["byers", "frohike", "mulder", "scully", "skinner"]).await;

    let events = t.ring.watch(&t.ctx, "check", 3, 5, "");
    let triggers = collect_triggers(&events, 2).await;

    assert_eq!(triggers[0], strings(&["byers", "frohike", "mulder"]));
    assert_eq!(triggers[1], strings(&["scully", "skinner", "byers"]));
    t.ctx.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_small_ring_repeats_to_fill_window() {
    let t = setup_ring("small-window");
    t.add_all(&["a", "b", "c"]).await;

    let events = t.ring.watch(&t.ctx, "check", 5, 5, "");
    let triggers = collect_triggers(&events, 3).await;

    for window in &triggers {
        assert_eq!(window, &strings(&["a", "b", "c", "a", "b"]));
    }
    t.ctx.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_two_item_ring_with_three_item_window() {
    let t = setup_ring("pair-window");
    t.add_all(&["a", "b"]).await;

    let events = t.ring.watch(&t.ctx, "check", 3, 5, "");
    let triggers = collect_triggers(&events, 2).await;

    assert_eq!(triggers[0], strings(&["a", "b", "a"]));
    assert_eq!(triggers[1], strings(&["a", "b", "a"]));
    t.ctx.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_watchers_with_different_windows_rotate_independently() {
    let t = setup_ring("mixed-windows");
    t.add_all(&["a", "b", "c", "d"]).await;

    let singles = t.ring.watch(&t.ctx, "check", 1, 5, "");
    let pairs = t.ring.watch(&t.ctx, "check", 2, 5, "");

    let singles = collect_triggers(&singles, 3).await;
    let pairs = collect_triggers(&pairs, 3).await;

    assert_eq!(singles, vec![strings(&["a"]), strings(&["b"]), strings(&["c"])]);
    assert_eq!(
        pairs,
        vec![strings(&["a", "b"]), strings(&["c", "d"]), strings(&["a", "b"])]
    );
    t.ctx.cancel();
}
