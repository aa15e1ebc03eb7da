//! Keyed store of asynchronous resource states.
//!
//! `QueryCache` is the single owner of cached server state. Reads go to the
//! server only on a miss, after an invalidation, or to retry an error, and
//! concurrent reads of one key share a single fetch. Every change to an
//! entry is pushed to that key's listeners after the store lock is released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;

use metrics::{counter, histogram};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::application::client::ResourceClient;
use crate::domain::error::SyncError;

use super::config::CacheConfig;
use super::entry::{CacheEntry, CachedValue, EntryStatus};
use super::fetch;
use super::keys::{CacheKey, KeyPattern};
use super::lock::mutex_lock;

const TARGET: &str = "boardsync::cache::store";

pub const METRIC_CACHE_HIT: &str = "boardsync_cache_hit_total";
pub const METRIC_CACHE_MISS: &str = "boardsync_cache_miss_total";
pub const METRIC_CACHE_COALESCED: &str = "boardsync_cache_coalesced_total";
pub const METRIC_CACHE_FETCH: &str = "boardsync_cache_fetch_total";
pub const METRIC_CACHE_FETCH_SECONDS: &str = "boardsync_cache_fetch_seconds";
pub const METRIC_CACHE_DISCARDED: &str = "boardsync_cache_discarded_total";
pub const METRIC_CACHE_INVALIDATED: &str = "boardsync_cache_invalidated_total";

/// Callback invoked with the new entry whenever a key's entry changes.
pub type Listener = Arc<dyn Fn(&CacheEntry) + Send + Sync>;

struct Slot {
    entry: CacheEntry,
    /// Closed once the read that is fetching this key finishes.
    in_flight: Option<watch::Receiver<()>>,
    listeners: Vec<(u64, Listener)>,
}

impl Slot {
    fn new() -> Self {
        Self {
            entry: CacheEntry::pending(),
            in_flight: None,
            listeners: Vec::new(),
        }
    }

    fn fetch_in_flight(&self) -> Option<watch::Receiver<()>> {
        self.in_flight
            .as_ref()
            .filter(|done| done.has_changed().is_ok())
            .cloned()
    }

    fn notification(&self) -> Notification {
        Notification {
            listeners: self.listeners.iter().map(|(_, l)| Arc::clone(l)).collect(),
            entry: self.entry.clone(),
        }
    }
}

struct Notification {
    listeners: Vec<Listener>,
    entry: CacheEntry,
}

impl Notification {
    fn deliver(self) {
        for listener in &self.listeners {
            listener(&self.entry);
        }
    }
}

enum Step {
    Hit(CacheEntry),
    Wait(watch::Receiver<()>),
    Lead { done: watch::Sender<()>, version: u64 },
}

enum FetchOutcome {
    Stored(CacheEntry),
    /// The entry moved on while the fetch was in the air.
    Superseded,
    /// The slot vanished (teardown); the result is handed back unstored.
    Detached(CacheEntry),
}

/// Result of an in-place change made through [`QueryCache::modify`].
#[derive(Debug, Clone)]
pub struct Modified {
    /// The whole entry as it was before the change.
    pub prior: CacheEntry,
    pub version: u64,
}

struct Inner {
    slots: Mutex<HashMap<CacheKey, Slot>>,
    next_listener: AtomicU64,
    client: Arc<dyn ResourceClient>,
    page_limit: u32,
}

/// Shared handle to one cache; clones refer to the same store.
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<Inner>,
}

impl QueryCache {
    pub fn new(client: Arc<dyn ResourceClient>, config: &CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: Mutex::new(HashMap::new()),
                next_listener: AtomicU64::new(1),
                client,
                page_limit: config.page_limit(),
            }),
        }
    }

    pub fn client(&self) -> &Arc<dyn ResourceClient> {
        &self.inner.client
    }

    pub fn page_limit(&self) -> u32 {
        self.inner.page_limit
    }

    /// Current entry for `key`, fetching it first when needed.
    ///
    /// Fetch failures are stored in the entry, never returned as `Err`.
    pub async fn read(&self, key: &CacheKey) -> CacheEntry {
        loop {
            match self.next_step(key) {
                Step::Hit(entry) => return entry,
                Step::Wait(mut done) => {
                    counter!(METRIC_CACHE_COALESCED, "kind" => key.kind().as_str()).increment(1);
                    // Errs once the leading read drops its sender, which is the signal.
                    let _ = done.changed().await;
                }
                Step::Lead { done, version } => {
                    debug!(target: TARGET, cache_key = %key, version, "fetch started");
                    let started = Instant::now();
                    let result =
                        fetch::load(self.inner.client.as_ref(), key, self.inner.page_limit).await;
                    histogram!(METRIC_CACHE_FETCH_SECONDS, "kind" => key.kind().as_str())
                        .record(started.elapsed().as_secs_f64());

                    let outcome = self.settle_fetch(key, version, result);
                    drop(done);
                    match outcome {
                        FetchOutcome::Stored(entry) | FetchOutcome::Detached(entry) => return entry,
                        FetchOutcome::Superseded => continue,
                    }
                }
            }
        }
    }

    fn next_step(&self, key: &CacheKey) -> Step {
        let mut slots = mutex_lock(&self.inner.slots, TARGET, "read");
        let slot = slots.entry(key.clone()).or_insert_with(Slot::new);

        if let Some(done) = slot.fetch_in_flight() {
            return Step::Wait(done);
        }
        if !slot.entry.needs_fetch() {
            counter!(METRIC_CACHE_HIT, "kind" => key.kind().as_str()).increment(1);
            return Step::Hit(slot.entry.clone());
        }

        counter!(METRIC_CACHE_MISS, "kind" => key.kind().as_str()).increment(1);
        let (done, watcher) = watch::channel(());
        slot.in_flight = Some(watcher);
        Step::Lead {
            done,
            version: slot.entry.version,
        }
    }

    fn settle_fetch(
        &self,
        key: &CacheKey,
        version: u64,
        result: Result<CachedValue, SyncError>,
    ) -> FetchOutcome {
        let result_label = match &result {
            Ok(_) => "ok",
            Err(err) => err.kind().as_str(),
        };
        counter!(METRIC_CACHE_FETCH, "kind" => key.kind().as_str(), "result" => result_label)
            .increment(1);

        let notification = {
            let mut slots = mutex_lock(&self.inner.slots, TARGET, "settle_fetch");
            let Some(slot) = slots.get_mut(key) else {
                debug!(target: TARGET, cache_key = %key, "fetch finished after teardown");
                let mut entry = CacheEntry::pending();
                apply_result(&mut entry, result);
                return FetchOutcome::Detached(entry);
            };

            if slot.entry.version != version {
                counter!(METRIC_CACHE_DISCARDED, "kind" => key.kind().as_str()).increment(1);
                debug!(
                    target: TARGET,
                    cache_key = %key,
                    started_at = version,
                    version = slot.entry.version,
                    "discarding superseded fetch result"
                );
                return FetchOutcome::Superseded;
            }

            apply_result(&mut slot.entry, result);
            slot.entry.version += 1;
            slot.notification()
        };

        let entry = notification.entry.clone();
        notification.deliver();
        FetchOutcome::Stored(entry)
    }

    /// Store `value` as the successful state of `key`; returns the new version.
    pub fn write(&self, key: &CacheKey, value: CachedValue) -> u64 {
        self.update_entry(key, "write", |entry| {
            apply_result(entry, Ok(value));
        })
    }

    /// Store `error` as the state of `key`, keeping whatever value it had.
    pub fn write_error(&self, key: &CacheKey, error: SyncError) -> u64 {
        self.update_entry(key, "write_error", |entry| {
            apply_result(entry, Err(error));
        })
    }

    /// Write only if the entry is still at `expected`; stale writers lose.
    pub fn write_if_version(&self, key: &CacheKey, expected: u64, value: CachedValue) -> bool {
        let notification = {
            let mut slots = mutex_lock(&self.inner.slots, TARGET, "write_if_version");
            let Some(slot) = slots.get_mut(key) else {
                return false;
            };
            if slot.entry.version != expected {
                counter!(METRIC_CACHE_DISCARDED, "kind" => key.kind().as_str()).increment(1);
                debug!(
                    target: TARGET,
                    cache_key = %key,
                    expected,
                    version = slot.entry.version,
                    "discarding write against a newer entry"
                );
                return false;
            }
            apply_result(&mut slot.entry, Ok(value));
            slot.entry.version += 1;
            slot.notification()
        };
        notification.deliver();
        true
    }

    /// Change the cached value of `key` in place.
    ///
    /// `change` runs against a copy while the store is locked, so it must not
    /// touch the cache itself. If it fails, the entry is left as it was and
    /// the error is returned.
    pub fn modify<F>(&self, key: &CacheKey, change: F) -> Result<Modified, SyncError>
    where
        F: FnOnce(&mut CachedValue) -> Result<(), SyncError>,
    {
        let (modified, notification) = {
            let mut slots = mutex_lock(&self.inner.slots, TARGET, "modify");
            let slot = slots
                .get_mut(key)
                .ok_or_else(|| SyncError::not_found(format!("nothing cached under {key}")))?;
            let mut next = slot
                .entry
                .value
                .clone()
                .ok_or_else(|| SyncError::not_found(format!("nothing loaded yet under {key}")))?;
            change(&mut next)?;

            let prior = slot.entry.clone();
            slot.entry.value = Some(next);
            slot.entry.version += 1;
            let modified = Modified {
                prior,
                version: slot.entry.version,
            };
            (modified, slot.notification())
        };
        notification.deliver();
        Ok(modified)
    }

    /// Put `snapshot`'s status, value, error and staleness back on `key`.
    ///
    /// The version still moves forward so fetches started before the restore
    /// cannot land on top of it.
    pub fn restore(&self, key: &CacheKey, snapshot: &CacheEntry) -> u64 {
        self.update_entry(key, "restore", |entry| {
            entry.status = snapshot.status;
            entry.value = snapshot.value.clone();
            entry.error = snapshot.error.clone();
            entry.stale = snapshot.stale;
        })
    }

    /// Mark every entry matching `pattern` stale; returns how many matched.
    ///
    /// Values stay readable while the entries are pending again, and the
    /// version bump drops any fetch already in the air for them.
    pub fn invalidate(&self, pattern: &KeyPattern) -> usize {
        let notifications: Vec<Notification> = {
            let mut slots = mutex_lock(&self.inner.slots, TARGET, "invalidate");
            slots
                .iter_mut()
                .filter(|(key, _)| pattern.matches(key))
                .map(|(_, slot)| {
                    slot.entry.stale = true;
                    slot.entry.status = EntryStatus::Pending;
                    slot.entry.error = None;
                    slot.entry.version += 1;
                    slot.notification()
                })
                .collect()
        };

        let count = notifications.len();
        counter!(METRIC_CACHE_INVALIDATED).increment(count as u64);
        debug!(target: TARGET, pattern = %pattern, count, "invalidated cache entries");
        for notification in notifications {
            notification.deliver();
        }
        count
    }

    /// Call `listener` on every change to `key` until the guard is dropped.
    ///
    /// Subscribing creates a pending entry for an unknown key but does not
    /// fetch it.
    pub fn subscribe<F>(&self, key: &CacheKey, listener: F) -> Subscription
    where
        F: Fn(&CacheEntry) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        let mut slots = mutex_lock(&self.inner.slots, TARGET, "subscribe");
        slots
            .entry(key.clone())
            .or_insert_with(Slot::new)
            .listeners
            .push((id, Arc::new(listener)));

        Subscription {
            cache: Arc::downgrade(&self.inner),
            key: key.clone(),
            id,
        }
    }

    /// Current entry for `key` without fetching.
    pub fn peek(&self, key: &CacheKey) -> Option<CacheEntry> {
        let slots = mutex_lock(&self.inner.slots, TARGET, "peek");
        slots.get(key).map(|slot| slot.entry.clone())
    }

    pub fn listener_count(&self, key: &CacheKey) -> usize {
        let slots = mutex_lock(&self.inner.slots, TARGET, "listener_count");
        slots.get(key).map_or(0, |slot| slot.listeners.len())
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.inner.slots, TARGET, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry and listener. Fetches still in flight finish
    /// detached and store nothing.
    pub fn teardown(&self) {
        let slots = {
            let mut slots = mutex_lock(&self.inner.slots, TARGET, "teardown");
            std::mem::take(&mut *slots)
        };
        info!(target: TARGET, entries = slots.len(), "query cache torn down");
        drop(slots);
    }

    fn update_entry(
        &self,
        key: &CacheKey,
        op: &'static str,
        change: impl FnOnce(&mut CacheEntry),
    ) -> u64 {
        let notification = {
            let mut slots = mutex_lock(&self.inner.slots, TARGET, op);
            let slot = slots.entry(key.clone()).or_insert_with(Slot::new);
            change(&mut slot.entry);
            slot.entry.version += 1;
            slot.notification()
        };
        let version = notification.entry.version;
        notification.deliver();
        version
    }
}

fn apply_result(entry: &mut CacheEntry, result: Result<CachedValue, SyncError>) {
    match result {
        Ok(value) => {
            entry.status = EntryStatus::Success;
            entry.value = Some(value);
            entry.error = None;
        }
        Err(error) => {
            entry.status = EntryStatus::Error;
            entry.error = Some(error);
        }
    }
    entry.stale = false;
}

/// Keeps a listener registered; unsubscribes on drop.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cache: Weak<Inner>,
    key: CacheKey,
    id: u64,
}

impl Subscription {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(inner) = self.cache.upgrade() else {
            return;
        };
        let mut slots = mutex_lock(&inner.slots, TARGET, "unsubscribe");
        if let Some(slot) = slots.get_mut(&self.key) {
            slot.listeners.retain(|(id, _)| *id != self.id);
        }
    }
}
