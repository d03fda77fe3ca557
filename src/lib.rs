//! Distributed coordination rings.
//!
//! Processes register live items (agent names, typically) in a [`Ring`] with
//! a keepalive, and any number of processes watch the ring to receive the
//! items in round-robin order, a fixed number at a time, on an interval or
//! cron cadence. All state lives in a [`RingStore`]; watchers sharing a
//! watcher key agree on the rotation through lease-backed trigger keys and
//! create-only writes.

mod config;
pub mod constants;
mod errors;
mod metrics;
mod ring;
mod storage;
mod subscription;

pub use config::*;
pub use errors::*;
pub use metrics::metrics_text;
pub use metrics::register_custom_metrics;
pub use ring::*;
pub use storage::*;
pub use subscription::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
