//! Coordination rings.
//!
//! A ring is an ordered set of live items (typically agent names). Watchers
//! attached to a ring receive `Trigger` events that hand out the items in
//! round-robin order, a window of `items` values at a time, once per
//! interval or cron tick. Every process watching the same ring with the
//! same watcher key observes the same rotation.

mod cadence;
mod event;
mod kv_ring;
mod path;
mod pool;
mod rate_limiter;
mod watcher;
mod window;

pub use cadence::*;
pub use event::*;
pub use kv_ring::*;
pub use path::path;
pub use pool::*;
pub use watcher::WatcherKey;
pub use window::repeat_items;


use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::Result;

/// Membership and scheduling operations of a single ring.
#[async_trait]
pub trait Ring: Send + Sync + 'static {
    /// Path the ring lives at.
    fn path(&self) -> &str;

    /// Adds `value` to the ring, or refreshes it when it is already there.
    ///
    /// The item stays in the ring for `keepalive_secs` unless added again.
    /// Keepalives of 5 seconds or less are rejected.
    async fn add(
        &self,
        ctx: &CancellationToken,
        value: &str,
        keepalive_secs: i64,
    ) -> Result<()>;

    /// Removes `value` from the ring. Removing an absent item is not an
    /// error.
    async fn remove(
        &self,
        ctx: &CancellationToken,
        value: &str,
    ) -> Result<()>;

    async fn is_empty(
        &self,
        ctx: &CancellationToken,
    ) -> Result<bool>;

    /// Current items in rotation order.
    async fn members(
        &self,
        ctx: &CancellationToken,
    ) -> Result<Vec<String>>;

    /// Watches the ring as watcher `name`, receiving `items` values per
    /// trigger.
    ///
    /// The cadence is `cron` when it is not empty, otherwise
    /// `interval_secs` when positive, otherwise the ring default. Calls with
    /// an equal name, item count and cadence share one watcher. The watcher
    /// stops once `ctx` (and the context of every other caller sharing it)
    /// is cancelled. Invalid arguments yield a stream carrying one `Error`
    /// followed by `Closing`.
    fn watch(
        &self,
        ctx: &CancellationToken,
        name: &str,
        items: usize,
        interval_secs: i64,
        cron: &str,
    ) -> EventStream;

    /// Sets the default interval used by watchers that did not name their
    /// own cadence. Intervals below 5 seconds are rejected.
    fn set_interval(
        &self,
        secs: i64,
    ) -> Result<()>;

    /// Sets a default cron schedule; it takes precedence over the default
    /// interval.
    fn set_cron(
        &self,
        schedule: CronSchedule,
    );
}
