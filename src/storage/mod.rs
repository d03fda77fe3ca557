//! Backing store adapter for coordination rings.
//!
//! A ring only needs a narrow slice of a replicated key-value store: sorted
//! prefix reads, leases, watches and a create-only conditional write. That
//! slice is the [`RingStore`] trait. [`MemStore`] is the in-process
//! implementation used by tests and single-process embedders.

mod adaptors;
mod retry;
mod ring_store;

pub use adaptors::*;
pub use retry::*;
pub use ring_store::*;
