//! In-process ring store.
//!
//! Keeps the keyspace in a `BTreeMap` so prefix ranges come back sorted,
//! tracks leases with tokio deadlines, and fans watch events out over
//! bounded per-watch channels. A background reaper deletes the keys of
//! expired leases and emits the matching `Delete` events, which is what
//! drives trigger expiry.
//!
//! The store must be created inside a tokio runtime.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tokio::time::sleep_until;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tokio_util::sync::DropGuard;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::constants::MEM_WATCH_BUFFER;
use crate::KeyValue;
use crate::Lease;
use crate::LeaseId;
use crate::LeaseTtl;
use crate::RingStore;
use crate::StoreError;
use crate::StoreResult;
use crate::TriggerState;
use crate::WatchEvent;
use crate::WatchEventKind;
use crate::WatchStream;

#[derive(Debug)]
struct LeaseEntry {
    ttl: i64,
    deadline: Instant,
    keys: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct MemState {
    data: BTreeMap<String, KeyValue>,
    leases: HashMap<LeaseId, LeaseEntry>,
    next_lease_id: LeaseId,
}

#[derive(Debug)]
struct WatchSink {
    target: String,
    prefix: bool,
    tx: mpsc::Sender<StoreResult<WatchEvent>>,
}

impl WatchSink {
    fn matches(
        &self,
        key: &str,
    ) -> bool {
        if self.prefix {
            key.starts_with(&self.target)
        } else {
            key == self.target
        }
    }
}

#[derive(Debug)]
struct Fault {
    remaining: usize,
    error: StoreError,
}

#[derive(Debug)]
struct MemStoreInner {
    state: Mutex<MemState>,
    watches: DashMap<u64, WatchSink>,
    next_watch_id: AtomicU64,
    lease_changed: Arc<Notify>,
    fault: Mutex<Option<Fault>>,
    _reaper: DropGuard,
}

/// In-memory [`RingStore`] with lease expiry, watches and fault injection.
#[derive(Debug, Clone)]
pub struct MemStore {
    inner: Arc<MemStoreInner>,
}

impl MemStore {
    pub fn new() -> Self {
        let lease_changed = Arc::new(Notify::new());
        let shutdown = CancellationToken::new();

        let inner = Arc::new(MemStoreInner {
            state: Mutex::new(MemState {
                next_lease_id: 1,
                ..Default::default()
            }),
            watches: DashMap::new(),
            next_watch_id: AtomicU64::new(1),
            lease_changed: lease_changed.clone(),
            fault: Mutex::new(None),
            _reaper: shutdown.clone().drop_guard(),
        });

        tokio::spawn(reap_expired_leases(Arc::downgrade(&inner), lease_changed, shutdown));

        Self { inner }
    }

    /// Makes the next `count` store calls fail with `error`.
    pub fn fail_next(
        &self,
        count: usize,
        error: StoreError,
    ) {
        *self.inner.fault.lock() = Some(Fault {
            remaining: count,
            error,
        });
    }

    /// Drops every open watch, as a store would on a leadership change.
    pub fn disconnect_watches(&self) {
        let n = self.inner.watches.len();
        self.inner.watches.clear();
        debug!("disconnected {} watches", n);
    }

    pub fn watch_count(&self) -> usize {
        self.inner.watches.len()
    }

    pub fn lease_count(&self) -> usize {
        self.inner.state.lock().leases.len()
    }

    /// Keys under `prefix` regardless of leases or faults.
    pub fn keys(
        &self,
        prefix: &str,
    ) -> Vec<String> {
        let state = self.inner.state.lock();
        state
            .data
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect()
    }

    fn check_fault(&self) -> StoreResult<()> {
        let mut fault = self.inner.fault.lock();
        if let Some(f) = fault.as_mut() {
            if f.remaining > 0 {
                f.remaining -= 1;
                let error = f.error.clone();
                if f.remaining == 0 {
                    *fault = None;
                }
                return Err(error);
            }
        }
        Ok(())
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStoreInner {
    fn put_locked(
        &self,
        state: &mut MemState,
        key: &str,
        value: &str,
        lease: Option<LeaseId>,
    ) -> StoreResult<WatchEvent> {
        if let Some(id) = lease {
            let entry = state.leases.get_mut(&id).ok_or(StoreError::LeaseNotFound(id))?;
            entry.keys.insert(key.to_string());
        }

        let previous = state.data.get(key).cloned();
        if let Some(old) = &previous {
            if old.lease != lease {
                if let Some(old_id) = old.lease {
                    if let Some(entry) = state.leases.get_mut(&old_id) {
                        entry.keys.remove(key);
                    }
                }
            }
        }

        let kv = KeyValue {
            key: key.to_string(),
            value: value.to_string(),
            version: previous.map(|p| p.version + 1).unwrap_or(1),
            lease,
        };
        state.data.insert(key.to_string(), kv.clone());

        Ok(WatchEvent {
            kind: WatchEventKind::Put,
            kv,
        })
    }

    fn delete_locked(
        &self,
        state: &mut MemState,
        key: &str,
    ) -> Option<WatchEvent> {
        let kv = state.data.remove(key)?;
        if let Some(id) = kv.lease {
            if let Some(entry) = state.leases.get_mut(&id) {
                entry.keys.remove(key);
            }
        }
        Some(WatchEvent {
            kind: WatchEventKind::Delete,
            kv,
        })
    }

    fn revoke_locked(
        &self,
        state: &mut MemState,
        id: LeaseId,
    ) -> Option<Vec<WatchEvent>> {
        let entry = state.leases.remove(&id)?;
        let mut events = Vec::new();
        for key in entry.keys {
            // the key may have been re-put under another lease
            let owned = state.data.get(&key).map(|kv| kv.lease == Some(id)).unwrap_or(false);
            if owned {
                if let Some(kv) = state.data.remove(&key) {
                    events.push(WatchEvent {
                        kind: WatchEventKind::Delete,
                        kv,
                    });
                }
            }
        }
        Some(events)
    }

    /// Must be called while the state lock is held so that every watcher
    /// observes events in commit order.
    fn dispatch(
        &self,
        events: &[WatchEvent],
    ) {
        if events.is_empty() {
            return;
        }
        let mut dead = Vec::new();
        for sink in self.watches.iter() {
            for event in events.iter().filter(|e| sink.matches(&e.kv.key)) {
                if let Err(e) = sink.tx.try_send(Ok(event.clone())) {
                    match e {
                        mpsc::error::TrySendError::Full(_) => {
                            warn!(watch_id = *sink.key(), "watch consumer too slow, cancelling watch");
                        }
                        mpsc::error::TrySendError::Closed(_) => {
                            trace!(watch_id = *sink.key(), "watch receiver dropped");
                        }
                    }
                    dead.push(*sink.key());
                    break;
                }
            }
        }
        for id in dead {
            self.watches.remove(&id);
        }
    }

    /// Expires every lease whose deadline has passed and returns the
    /// earliest remaining deadline.
    fn expire_due(
        &self,
        now: Instant,
    ) -> Option<Instant> {
        let mut state = self.state.lock();
        let due: Vec<LeaseId> = state
            .leases
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        let mut events = Vec::new();
        for id in due {
            debug!(lease = id, "lease expired");
            if let Some(mut expired) = self.revoke_locked(&mut state, id) {
                events.append(&mut expired);
            }
        }
        self.dispatch(&events);

        state.leases.values().map(|entry| entry.deadline).min()
    }
}

async fn reap_expired_leases(
    inner: Weak<MemStoreInner>,
    lease_changed: Arc<Notify>,
    shutdown: CancellationToken,
) {
    loop {
        let next_deadline = match inner.upgrade() {
            Some(inner) => inner.expire_due(Instant::now()),
            None => return,
        };
        let deadline = next_deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => return,
            _ = lease_changed.notified() => {}
            _ = sleep_until(deadline) => {}
        }
    }
}

#[async_trait]
impl RingStore for MemStore {
    async fn get(
        &self,
        key: &str,
    ) -> StoreResult<Option<KeyValue>> {
        self.check_fault()?;
        Ok(self.inner.state.lock().data.get(key).cloned())
    }

    async fn range(
        &self,
        prefix: &str,
        from: &str,
        limit: usize,
    ) -> StoreResult<Vec<KeyValue>> {
        self.check_fault()?;
        let start = if from > prefix { from } else { prefix };
        let state = self.inner.state.lock();
        let matches = state
            .data
            .range(start.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(_, kv)| kv.clone());
        Ok(if limit == 0 {
            matches.collect()
        } else {
            matches.take(limit).collect()
        })
    }

    async fn put(
        &self,
        key: &str,
        value: &str,
        lease: Option<LeaseId>,
    ) -> StoreResult<()> {
        self.check_fault()?;
        let mut state = self.inner.state.lock();
        let event = self.inner.put_locked(&mut state, key, value, lease)?;
        self.inner.dispatch(&[event]);
        Ok(())
    }

    async fn delete(
        &self,
        key: &str,
    ) -> StoreResult<bool> {
        self.check_fault()?;
        let mut state = self.inner.state.lock();
        match self.inner.delete_locked(&mut state, key) {
            Some(event) => {
                self.inner.dispatch(&[event]);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn grant(
        &self,
        ttl_secs: i64,
    ) -> StoreResult<Lease> {
        self.check_fault()?;
        if ttl_secs <= 0 {
            return Err(StoreError::Internal(format!("invalid lease ttl {ttl_secs}")));
        }
        let id = {
            let mut state = self.inner.state.lock();
            let id = state.next_lease_id;
            state.next_lease_id += 1;
            state.leases.insert(
                id,
                LeaseEntry {
                    ttl: ttl_secs,
                    deadline: Instant::now() + Duration::from_secs(ttl_secs as u64),
                    keys: BTreeSet::new(),
                },
            );
            id
        };
        self.inner.lease_changed.notify_one();
        trace!(lease = id, ttl = ttl_secs, "lease granted");
        Ok(Lease { id, ttl: ttl_secs })
    }

    async fn keep_alive_once(
        &self,
        id: LeaseId,
    ) -> StoreResult<i64> {
        self.check_fault()?;
        let mut state = self.inner.state.lock();
        let entry = state.leases.get_mut(&id).ok_or(StoreError::LeaseNotFound(id))?;
        entry.deadline = Instant::now() + Duration::from_secs(entry.ttl as u64);
        Ok(entry.ttl)
    }

    async fn revoke(
        &self,
        id: LeaseId,
    ) -> StoreResult<()> {
        self.check_fault()?;
        let mut state = self.inner.state.lock();
        let events = self.inner.revoke_locked(&mut state, id).ok_or(StoreError::LeaseNotFound(id))?;
        self.inner.dispatch(&events);
        trace!(lease = id, "lease revoked");
        Ok(())
    }

    async fn time_to_live(
        &self,
        id: LeaseId,
    ) -> StoreResult<Option<LeaseTtl>> {
        self.check_fault()?;
        let state = self.inner.state.lock();
        Ok(state.leases.get(&id).map(|entry| {
            let left = entry.deadline.saturating_duration_since(Instant::now());
            LeaseTtl {
                granted: entry.ttl,
                remaining: left.as_millis().div_ceil(1000) as i64,
            }
        }))
    }

    async fn create_if_absent(
        &self,
        key: &str,
        value: &str,
        lease: LeaseId,
    ) -> StoreResult<bool> {
        self.check_fault()?;
        let mut state = self.inner.state.lock();
        if state.data.contains_key(key) {
            return Ok(false);
        }
        let event = self.inner.put_locked(&mut state, key, value, Some(lease))?;
        self.inner.dispatch(&[event]);
        Ok(true)
    }

    async fn trigger_state(
        &self,
        trigger_key: &str,
        item_prefix: &str,
    ) -> StoreResult<TriggerState> {
        self.check_fault()?;
        let state = self.inner.state.lock();
        let first_item = state
            .data
            .range(item_prefix.to_string()..)
            .next()
            .filter(|(k, _)| k.starts_with(item_prefix))
            .map(|(_, kv)| kv.clone());
        Ok(TriggerState {
            trigger: state.data.get(trigger_key).cloned(),
            first_item,
        })
    }

    async fn watch(
        &self,
        key: &str,
        prefix: bool,
    ) -> StoreResult<WatchStream> {
        self.check_fault()?;
        let (tx, rx) = mpsc::channel(MEM_WATCH_BUFFER);
        let id = self.inner.next_watch_id.fetch_add(1, Ordering::Relaxed);
        self.inner.watches.insert(
            id,
            WatchSink {
                target: key.to_string(),
                prefix,
                tx,
            },
        );
        trace!(watch_id = id, key, prefix, "watch registered");
        Ok(ReceiverStream::new(rx).boxed())
    }
}
