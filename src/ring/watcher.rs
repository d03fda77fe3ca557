//! One watcher task per distinct watcher key.
//!
//! A watcher owns a trigger key under the ring's triggers prefix. The trigger
//! is written with a lease whose TTL is the watcher's cadence and whose value
//! names the item whose turn comes next. When the lease expires the store
//! deletes the trigger; every watcher session observing that delete races to
//! write the following trigger with a create-only write, and each of them
//! delivers the window of items that just came up.

use std::fmt;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::trace;
use tracing::warn;

use super::cadence::WatcherCadence;
use super::path::item_key;
use super::rate_limiter::RestartLimiter;
use super::window::next_window;
use super::window::Window;
use crate::metrics::ACTIVE_WATCHERS;
use crate::metrics::TRIGGERS_TOTAL;
use crate::metrics::TRIGGER_RACES_TOTAL;
use crate::metrics::WATCHER_RESTARTS_TOTAL;
use crate::storage::cancellable_sleep;
use crate::storage::Backoff;
use crate::Error;
use crate::Event;
use crate::Result;
use crate::RingConfig;
use crate::RingStore;
use crate::StoreError;
use crate::WatchEvent;
use crate::WatchEventKind;
use crate::retry_store_call;

/// Identity of a watcher within a ring. Callers watching with equal keys
/// share a single watcher and its event stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatcherKey {
    pub name: String,
    pub items: usize,
    pub interval: i64,
    pub cron: String,
}

impl fmt::Display for WatcherKey {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        if self.cron.is_empty() {
            write!(f, "{}/{}/{}s", self.name, self.items, self.interval)
        } else {
            write!(f, "{}/{}/{}", self.name, self.items, self.cron)
        }
    }
}

pub(crate) struct Watcher<S: RingStore> {
    store: Arc<S>,
    key: WatcherKey,
    ring_path: String,
    items_prefix: String,
    trigger_key: String,
    cadence: WatcherCadence,
    config: Arc<RingConfig>,
    limiter: Arc<RestartLimiter>,
    events: mpsc::Sender<Event>,
    notifier: mpsc::Receiver<()>,
}

impl<S: RingStore> Watcher<S> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        store: Arc<S>,
        key: WatcherKey,
        ring_path: String,
        items_prefix: String,
        trigger_key: String,
        cadence: WatcherCadence,
        config: Arc<RingConfig>,
        limiter: Arc<RestartLimiter>,
        events: mpsc::Sender<Event>,
        notifier: mpsc::Receiver<()>,
    ) -> Self {
        Self {
            store,
            key,
            ring_path,
            items_prefix,
            trigger_key,
            cadence,
            config,
            limiter,
            events,
            notifier,
        }
    }

    /// Runs sessions until `cancel` fires, restarting after every fault.
    pub(crate) async fn run(
        mut self,
        cancel: CancellationToken,
    ) {
        let active = ACTIVE_WATCHERS.with_label_values(&[self.ring_path.as_str()]);
        active.inc();
        debug!(ring = %self.ring_path, watcher = %self.key, "watcher started");

        loop {
            match self.run_session(&cancel).await {
                Ok(()) | Err(Error::Cancelled) => break,
                Err(e) => {
                    if e.is_transient() {
                        warn!(ring = %self.ring_path, watcher = %self.key, "watch session interrupted, restarting: {}", e);
                    } else {
                        error!(ring = %self.ring_path, watcher = %self.key, "watch session failed, restarting: {}", e);
                    }
                    WATCHER_RESTARTS_TOTAL
                        .with_label_values(&[self.ring_path.as_str()])
                        .inc();

                    if self.emit(&cancel, Event::error(e)).await.is_err() {
                        break;
                    }
                    if self.limiter.acquire(&cancel).await.is_err() {
                        break;
                    }
                }
            }
        }

        // best effort: nobody may be reading any more
        let _ = self.events.try_send(Event::closing());
        active.dec();
        debug!(ring = %self.ring_path, watcher = %self.key, "watcher stopped");
    }

    /// One watch session. Only returns on error; cancellation surfaces as
    /// `Error::Cancelled`.
    async fn run_session(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let store = self.store.as_ref();
        let policy = &self.config.retry.store;
        let items_prefix = self.items_prefix.as_str();
        let trigger_key = self.trigger_key.as_str();

        let mut items = retry_store_call(cancel, policy, "watch", move || store.watch(items_prefix, true)).await?;
        let mut trigger = retry_store_call(cancel, policy, "watch", move || store.watch(trigger_key, false)).await?;

        self.ensure_active_trigger(cancel).await?;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),

                event = trigger.next() => {
                    let event = event.ok_or_else(|| StoreError::WatchClosed(self.trigger_key.clone()))??;
                    if event.kind == WatchEventKind::Delete {
                        self.handle_ring_trigger(cancel, &event.kv.value).await?;
                    }
                }

                event = items.next() => {
                    let event = event.ok_or_else(|| StoreError::WatchClosed(self.items_prefix.clone()))??;
                    self.handle_item_event(cancel, event).await?;
                }

                Some(()) = self.notifier.recv() => {
                    trace!(watcher = %self.key, "woken by ring change");
                }
            }

            self.ensure_active_trigger(cancel).await?;
        }
    }

    async fn handle_item_event(
        &self,
        cancel: &CancellationToken,
        event: WatchEvent,
    ) -> Result<()> {
        let value = self.item_value(&event.kv.key).to_string();
        match event.kind {
            WatchEventKind::Put if event.kv.version == 1 => self.emit(cancel, Event::add(value)).await,
            WatchEventKind::Put => Ok(()),
            WatchEventKind::Delete => self.emit(cancel, Event::remove(value)).await,
        }
    }

    /// The trigger pointing at `prev` expired: deliver its window and arm
    /// the next trigger.
    pub(crate) async fn handle_ring_trigger(
        &self,
        cancel: &CancellationToken,
        prev: &str,
    ) -> Result<()> {
        let Some(window) = self.advance_ring(cancel, prev).await? else {
            debug!(watcher = %self.key, "ring is empty, trigger not re-armed");
            return Ok(());
        };

        TRIGGERS_TOTAL.with_label_values(&[self.ring_path.as_str()]).inc();
        trace!(watcher = %self.key, values = ?window.values, next = %window.next, "trigger");
        self.emit(cancel, Event::trigger(window.values)).await
    }

    /// Computes the window starting at `prev` and writes the next trigger.
    ///
    /// The window is returned whether or not this session won the write.
    pub(crate) async fn advance_ring(
        &self,
        cancel: &CancellationToken,
        prev: &str,
    ) -> Result<Option<Window>> {
        let fetched = self.fetch_from(cancel, prev).await?;
        let Some(window) = next_window(&fetched, self.key.items) else {
            return Ok(None);
        };

        match self.create_trigger(cancel, &window.next).await {
            Ok(_) => {}
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                // the next ensure pass re-arms from the head of the ring
                warn!(watcher = %self.key, next = %window.next, "could not write next trigger: {}", e);
            }
        }

        Ok(Some(window))
    }

    /// Up to `items + 1` ring members in ring order, starting at `prev`
    /// (inclusive) and wrapping around to the head of the ring.
    async fn fetch_from(
        &self,
        cancel: &CancellationToken,
        prev: &str,
    ) -> Result<Vec<String>> {
        let want = self.key.items + 1;
        let store = self.store.as_ref();
        let policy = &self.config.retry.store;
        let prefix = self.items_prefix.as_str();
        let from = item_key(prefix, prev);
        let from = from.as_str();

        let mut fetched = retry_store_call(cancel, policy, "range", move || store.range(prefix, from, want)).await?;

        if fetched.len() < want {
            let head_limit = want - fetched.len();
            let head = retry_store_call(cancel, policy, "range", move || store.range(prefix, "", head_limit)).await?;

            let first = fetched.first().map(|kv| kv.key.clone());
            for kv in head {
                if first.as_deref().is_some_and(|first| kv.key.as_str() >= first) {
                    break;
                }
                fetched.push(kv);
            }
        }

        Ok(fetched
            .iter()
            .map(|kv| self.item_value(&kv.key).to_string())
            .collect())
    }

    /// Makes sure a trigger exists while the ring has members, retrying
    /// with the trigger backoff until it succeeds or `cancel` fires.
    pub(crate) async fn ensure_active_trigger(
        &self,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let policy = &self.config.retry.trigger;
        let mut backoff = Backoff::new(policy);
        let mut attempts = 0;

        loop {
            let attempt = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                r = self.try_ensure_trigger(cancel) => r,
            };

            match attempt {
                Ok(()) => return Ok(()),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    attempts += 1;
                    if policy.max_retries != 0 && attempts > policy.max_retries {
                        return Err(e);
                    }
                    let delay = backoff.next_delay();
                    warn!(watcher = %self.key, attempts, ?delay, "could not ensure trigger: {}", e);
                    cancellable_sleep(cancel, delay).await?;
                }
            }
        }
    }

    async fn try_ensure_trigger(
        &self,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let state = self
            .store
            .trigger_state(&self.trigger_key, &self.items_prefix)
            .await?;

        if state.trigger.is_some() {
            return Ok(());
        }
        let Some(first) = state.first_item else {
            trace!(watcher = %self.key, "ring is empty");
            return Ok(());
        };

        let value = self.item_value(&first.key).to_string();
        self.create_trigger(cancel, &value).await?;
        Ok(())
    }

    /// Writes the trigger pointing at `value` under a fresh lease. Returns
    /// false, after revoking the unused lease, when another session wrote
    /// the trigger first.
    ///
    /// Store calls are retried on transient faults. A create-only write that
    /// is retried can find the key written by its own earlier attempt, so a
    /// lost race after a retry is confirmed against the lease on the key.
    pub(crate) async fn create_trigger(
        &self,
        cancel: &CancellationToken,
        value: &str,
    ) -> Result<bool> {
        let store = self.store.as_ref();
        let policy = &self.config.retry.store;
        let trigger_key = self.trigger_key.as_str();
        let ttl = self.cadence.interval_secs();

        let lease = retry_store_call(cancel, policy, "grant", move || store.grant(ttl)).await?;
        let lease_id = lease.id;

        let mut attempts = 0usize;
        let counter = &mut attempts;
        let created = retry_store_call(cancel, policy, "create_if_absent", move || {
            *counter += 1;
            store.create_if_absent(trigger_key, value, lease_id)
        })
        .await;

        let created = match created {
            Ok(false) if attempts > 1 => self.holds_trigger(cancel, lease_id).await,
            other => other,
        };

        match created {
            Ok(true) => {
                debug!(watcher = %self.key, next = %value, ttl, "trigger armed");
                Ok(true)
            }
            Ok(false) => {
                TRIGGER_RACES_TOTAL.with_label_values(&[self.ring_path.as_str()]).inc();
                self.revoke_unused(cancel, lease_id).await;
                Ok(false)
            }
            Err(e) => {
                self.revoke_unused(cancel, lease_id).await;
                Err(e)
            }
        }
    }

    /// Whether the trigger key is currently attached to `lease`.
    async fn holds_trigger(
        &self,
        cancel: &CancellationToken,
        lease: i64,
    ) -> Result<bool> {
        let store = self.store.as_ref();
        let trigger_key = self.trigger_key.as_str();
        let current = retry_store_call(cancel, &self.config.retry.store, "get", move || store.get(trigger_key)).await?;
        Ok(current.is_some_and(|kv| kv.lease == Some(lease)))
    }

    async fn revoke_unused(
        &self,
        cancel: &CancellationToken,
        lease: i64,
    ) {
        let store = self.store.as_ref();
        // an unrevoked lease only lingers until its TTL runs out
        if let Err(e) = retry_store_call(cancel, &self.config.retry.store, "revoke", move || store.revoke(lease)).await {
            debug!(watcher = %self.key, lease, "could not revoke unused lease: {}", e);
        }
    }

    async fn emit(
        &self,
        cancel: &CancellationToken,
        event: Event,
    ) -> Result<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            sent = self.events.send(event) => sent.map_err(|_| Error::Cancelled),
        }
    }

    fn item_value<'a>(
        &self,
        key: &'a str,
    ) -> &'a str {
        key.strip_prefix(self.items_prefix.as_str()).unwrap_or(key)
    }
}
