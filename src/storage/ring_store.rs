use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
#[cfg(test)]
use mockall::automock;

use crate::StoreResult;

pub type LeaseId = i64;

/// A stored key with its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
    /// 1 when the key is created, incremented by every later put.
    /// A deleted and re-created key starts over at 1.
    pub version: i64,
    pub lease: Option<LeaseId>,
}

/// A lease handle as granted by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub id: LeaseId,
    pub ttl: i64,
}

/// TTL information reported for a live lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseTtl {
    /// TTL the lease was granted with
    pub granted: i64,
    /// Seconds left before expiry
    pub remaining: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Put,
    Delete,
}

/// A change observed on a watched key or prefix.
///
/// For `Delete` events `kv` carries the last value the key held, so
/// consumers can tell which trigger target just expired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub kv: KeyValue,
}

/// Stream of watch events. The stream ending means the store dropped the
/// watch and the consumer must re-establish it.
pub type WatchStream = Pin<Box<dyn Stream<Item = StoreResult<WatchEvent>> + Send>>;

/// Result of the combined trigger read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerState {
    pub trigger: Option<KeyValue>,
    pub first_item: Option<KeyValue>,
}

/// Backing store adapter.
///
/// Any consistent key-value store with leases, watches and conditional
/// writes can back a ring. Keys are plain strings and every range query
/// returns keys in ascending order.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RingStore: Send + Sync + 'static {
    async fn get(
        &self,
        key: &str,
    ) -> StoreResult<Option<KeyValue>>;

    /// Keys under `prefix`, starting at `from` (inclusive) when it is not
    /// empty. A `limit` of 0 returns every match.
    async fn range(
        &self,
        prefix: &str,
        from: &str,
        limit: usize,
    ) -> StoreResult<Vec<KeyValue>>;

    async fn put(
        &self,
        key: &str,
        value: &str,
        lease: Option<LeaseId>,
    ) -> StoreResult<()>;

    /// Returns whether a key was removed.
    async fn delete(
        &self,
        key: &str,
    ) -> StoreResult<bool>;

    async fn grant(
        &self,
        ttl_secs: i64,
    ) -> StoreResult<Lease>;

    /// Refreshes the lease once and returns its TTL.
    /// Fails with `StoreError::LeaseNotFound` when the lease is gone.
    async fn keep_alive_once(
        &self,
        id: LeaseId,
    ) -> StoreResult<i64>;

    /// Revokes the lease and deletes every key attached to it.
    async fn revoke(
        &self,
        id: LeaseId,
    ) -> StoreResult<()>;

    async fn time_to_live(
        &self,
        id: LeaseId,
    ) -> StoreResult<Option<LeaseTtl>>;

    /// Writes `key` only if it does not exist (version == 0).
    /// Returns false when another writer got there first.
    async fn create_if_absent(
        &self,
        key: &str,
        value: &str,
        lease: LeaseId,
    ) -> StoreResult<bool>;

    /// Reads the trigger key and the first key under `item_prefix` in a
    /// single read transaction.
    async fn trigger_state(
        &self,
        trigger_key: &str,
        item_prefix: &str,
    ) -> StoreResult<TriggerState>;

    async fn watch(
        &self,
        key: &str,
        prefix: bool,
    ) -> StoreResult<WatchStream>;
}
