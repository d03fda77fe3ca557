use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use nanoid::nanoid;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;

use super::cadence::RingCadence;
use super::cadence::WatcherCadence;
use super::path::item_key;
use super::path::items_prefix;
use super::path::trigger_key;
use super::path::triggers_prefix;
use super::rate_limiter::RestartLimiter;
use super::watcher::Watcher;
use crate::constants::MIN_INTERVAL_SECS;
use crate::constants::MIN_KEEPALIVE_SECS;
use crate::retry_store_call;
use crate::CronSchedule;
use crate::Error;
use crate::EventStream;
use crate::Result;
use crate::Ring;
use crate::RingConfig;
use crate::RingStore;
use crate::StoreError;
use crate::ValidationError;
use crate::WatcherKey;

/// A [`Ring`] kept in a [`RingStore`].
///
/// Items live under `<path>/items/<value>`, each attached to its own lease.
/// Triggers live under `<path>/triggers/`, one per watcher key.
pub struct KvRing<S: RingStore> {
    inner: Arc<KvRingInner<S>>,
}

struct KvRingInner<S: RingStore> {
    store: Arc<S>,
    path: String,
    items_prefix: String,
    triggers_prefix: String,
    cadence: Arc<ArcSwap<RingCadence>>,
    config: Arc<RingConfig>,
    limiter: Arc<RestartLimiter>,
    watchers: Mutex<HashMap<WatcherKey, WatcherEntry>>,
}

/// Registry entry for a running watcher.
struct WatcherEntry {
    session: String,
    events: EventStream,
    notifier: mpsc::Sender<()>,
    token: CancellationToken,
    subscribers: Arc<AtomicUsize>,
}

impl<S: RingStore> KvRing<S> {
    pub fn new(
        store: Arc<S>,
        path: &str,
        config: RingConfig,
    ) -> Self {
        let cadence = RingCadence {
            interval_secs: config.ring.default_interval_secs.max(MIN_INTERVAL_SECS),
            cron: None,
        };
        let limiter = RestartLimiter::new(config.ring.restart_rate_per_sec, config.ring.restart_burst);

        Self {
            inner: Arc::new(KvRingInner {
                store,
                path: path.to_string(),
                items_prefix: items_prefix(path),
                triggers_prefix: triggers_prefix(path),
                cadence: Arc::new(ArcSwap::from_pointee(cadence)),
                config: Arc::new(config),
                limiter: Arc::new(limiter),
                watchers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Number of watchers currently registered on this ring.
    pub fn watcher_count(&self) -> usize {
        self.inner.watchers.lock().len()
    }

    /// Current ring-wide default cadence.
    pub fn default_cadence(&self) -> RingCadence {
        self.inner.cadence.load().as_ref().clone()
    }
}

impl<S: RingStore> KvRingInner<S> {
    fn item_key(
        &self,
        value: &str,
    ) -> String {
        item_key(&self.items_prefix, value)
    }

    /// Wakes every watcher so it re-checks its trigger. Never blocks; a
    /// watcher that already has a wake-up pending is skipped.
    fn notify_watchers(&self) {
        let watchers = self.watchers.lock();
        for (key, entry) in watchers.iter() {
            if entry.notifier.try_send(()).is_err() {
                trace!(watcher = %key, "wake-up already pending");
            }
        }
    }

    fn unregister(
        &self,
        key: &WatcherKey,
        session: &str,
    ) {
        let mut watchers = self.watchers.lock();
        if watchers.get(key).is_some_and(|entry| entry.session == session) {
            watchers.remove(key);
            debug!(ring = %self.path, watcher = %key, "watcher unregistered");
        }
    }

    async fn add(
        &self,
        ctx: &CancellationToken,
        value: &str,
        keepalive_secs: i64,
    ) -> Result<()> {
        if keepalive_secs <= MIN_KEEPALIVE_SECS {
            return Err(ValidationError::KeepaliveTooShort {
                ttl: keepalive_secs,
                min: MIN_KEEPALIVE_SECS,
            }
            .into());
        }

        let store = self.store.as_ref();
        let policy = &self.config.retry.store;
        let key = self.item_key(value);
        let key = key.as_str();

        let existing = retry_store_call(ctx, policy, "get", move || store.get(key)).await?;
        let old_lease = existing.and_then(|kv| kv.lease);

        if let Some(lease) = old_lease {
            let ttl = retry_store_call(ctx, policy, "time_to_live", move || store.time_to_live(lease)).await?;
            if ttl.is_some_and(|ttl| ttl.granted == keepalive_secs) {
                match retry_store_call(ctx, policy, "keep_alive", move || store.keep_alive_once(lease)).await {
                    Ok(_) => {
                        trace!(ring = %self.path, item = %value, lease, "item lease refreshed");
                        self.notify_watchers();
                        return Ok(());
                    }
                    // expired in between; fall through to a fresh lease
                    Err(Error::Store(StoreError::LeaseNotFound(_))) => {}
                    Err(e) => return Err(e),
                }
            }
        }

        let lease = retry_store_call(ctx, policy, "grant", move || store.grant(keepalive_secs)).await?;
        let lease_id = lease.id;
        if let Err(e) = retry_store_call(ctx, policy, "put", move || store.put(key, "", Some(lease_id))).await {
            // nothing is attached to the new lease yet
            if let Err(revoke_err) = retry_store_call(ctx, policy, "revoke", move || store.revoke(lease_id)).await {
                debug!(ring = %self.path, item = %value, lease = lease_id, "could not revoke unused lease: {}", revoke_err);
            }
            return Err(e);
        }

        // the item now belongs to the new lease, so revoking the old one
        // leaves it in place
        if let Some(old) = old_lease {
            match retry_store_call(ctx, policy, "revoke", move || store.revoke(old)).await {
                Ok(()) | Err(Error::Store(StoreError::LeaseNotFound(_))) => {}
                Err(e) => return Err(e),
            }
        }

        debug!(ring = %self.path, item = %value, keepalive_secs, "item added");
        self.notify_watchers();
        Ok(())
    }
}

#[async_trait]
impl<S: RingStore> Ring for KvRing<S> {
    fn path(&self) -> &str {
        &self.inner.path
    }

    async fn add(
        &self,
        ctx: &CancellationToken,
        value: &str,
        keepalive_secs: i64,
    ) -> Result<()> {
        self.inner.add(ctx, value, keepalive_secs).await
    }

    async fn remove(
        &self,
        ctx: &CancellationToken,
        value: &str,
    ) -> Result<()> {
        let inner = &self.inner;
        let store = inner.store.as_ref();
        let key = inner.item_key(value);
        let key = key.as_str();

        let removed = retry_store_call(ctx, &inner.config.retry.store, "delete", move || store.delete(key)).await?;
        debug!(ring = %inner.path, item = %value, removed, "item removed");
        Ok(())
    }

    async fn is_empty(
        &self,
        ctx: &CancellationToken,
    ) -> Result<bool> {
        let inner = &self.inner;
        let store = inner.store.as_ref();
        let prefix = inner.items_prefix.as_str();

        let head = retry_store_call(ctx, &inner.config.retry.store, "range", move || store.range(prefix, "", 1)).await?;
        Ok(head.is_empty())
    }

    async fn members(
        &self,
        ctx: &CancellationToken,
    ) -> Result<Vec<String>> {
        let inner = &self.inner;
        let store = inner.store.as_ref();
        let prefix = inner.items_prefix.as_str();

        let all = retry_store_call(ctx, &inner.config.retry.store, "range", move || store.range(prefix, "", 0)).await?;
        Ok(all
            .into_iter()
            .filter_map(|kv| kv.key.strip_prefix(prefix).map(str::to_string))
            .collect())
    }

    fn watch(
        &self,
        ctx: &CancellationToken,
        name: &str,
        items: usize,
        interval_secs: i64,
        cron: &str,
    ) -> EventStream {
        let inner = &self.inner;

        if items == 0 {
            return EventStream::failed(ValidationError::InvalidItems(0).into());
        }
        let cadence = match WatcherCadence::resolve(interval_secs, cron, &inner.cadence) {
            Ok(cadence) => cadence,
            Err(e) => return EventStream::failed(e.into()),
        };

        let key = WatcherKey {
            name: name.to_string(),
            items,
            interval: interval_secs.max(0),
            cron: cron.trim().to_string(),
        };

        let mut watchers = inner.watchers.lock();

        if let Some(entry) = watchers.get(&key) {
            if !entry.token.is_cancelled() {
                trace!(ring = %inner.path, watcher = %key, "joining running watcher");
                subscribe(inner.clone(), ctx.clone(), entry);
                return entry.events.clone();
            }
        }

        let (events_tx, events_rx) = mpsc::channel(inner.config.watcher.event_buffer);
        let (notifier_tx, notifier_rx) = mpsc::channel(inner.config.watcher.notifier_buffer);
        let entry = WatcherEntry {
            session: nanoid!(),
            events: EventStream::new(events_rx),
            notifier: notifier_tx,
            token: CancellationToken::new(),
            subscribers: Arc::new(AtomicUsize::new(0)),
        };
        subscribe(inner.clone(), ctx.clone(), &entry);

        let watcher = Watcher::new(
            inner.store.clone(),
            key.clone(),
            inner.path.clone(),
            inner.items_prefix.clone(),
            trigger_key(&inner.triggers_prefix, &key),
            cadence,
            inner.config.clone(),
            inner.limiter.clone(),
            events_tx,
            notifier_rx,
        );

        let events = entry.events.clone();
        let token = entry.token.clone();
        let session = entry.session.clone();
        watchers.insert(key.clone(), entry);
        drop(watchers);

        let ring = inner.clone();
        tokio::spawn(async move {
            watcher.run(token).await;
            ring.unregister(&key, &session);
        });

        events
    }

    fn set_interval(
        &self,
        secs: i64,
    ) -> Result<()> {
        if secs < MIN_INTERVAL_SECS {
            return Err(ValidationError::IntervalTooShort {
                secs,
                min: MIN_INTERVAL_SECS,
            }
            .into());
        }
        self.inner.cadence.rcu(|current| RingCadence {
            interval_secs: secs,
            cron: current.cron.clone(),
        });
        debug!(ring = %self.inner.path, secs, "default interval changed");
        Ok(())
    }

    fn set_cron(
        &self,
        schedule: CronSchedule,
    ) {
        debug!(ring = %self.inner.path, cron = %schedule.expr(), "default cron changed");
        self.inner.cadence.rcu(|current| RingCadence {
            interval_secs: current.interval_secs,
            cron: Some(schedule.clone()),
        });
    }
}

/// Ties `ctx` to the watcher behind `entry`: the watcher stops once every
/// caller context that subscribed to it has been cancelled.
///
/// Must be called with the registry lock held.
fn subscribe<S: RingStore>(
    ring: Arc<KvRingInner<S>>,
    ctx: CancellationToken,
    entry: &WatcherEntry,
) {
    entry.subscribers.fetch_add(1, Ordering::SeqCst);

    let subscribers = entry.subscribers.clone();
    let token = entry.token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = ctx.cancelled() => {
                let _watchers = ring.watchers.lock();
                if subscribers.fetch_sub(1, Ordering::SeqCst) == 1 {
                    token.cancel();
                }
            }
            _ = token.cancelled() => {}
        }
    });
}
