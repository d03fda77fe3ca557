// -
// Timing floors

/// No watcher ever fires faster than this.
pub const MIN_INTERVAL_SECS: i64 = 5;

/// Item keepalives must be strictly greater than this.
pub const MIN_KEEPALIVE_SECS: i64 = 5;

// -
// Key layout

/// Root segment for every ring path.
pub const RINGS_ROOT: &str = "rings";

pub(crate) const ITEMS_SEGMENT: &str = "items";
pub(crate) const TRIGGERS_SEGMENT: &str = "triggers";

// -
// Trigger re-arm backoff

pub(crate) const TRIGGER_BACKOFF_FLOOR_MS: u64 = 10;
pub(crate) const TRIGGER_BACKOFF_CEILING_MS: u64 = 10_000;
pub(crate) const TRIGGER_BACKOFF_FACTOR: u32 = 10;

/// Watch channel capacity used by the in-memory store.
pub(crate) const MEM_WATCH_BUFFER: usize = 1024;
