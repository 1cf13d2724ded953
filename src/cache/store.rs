//! The cache store: one shared map from fingerprint to [`CacheEntry`].
//!
//! # Concurrency
//!
//! All state sits behind a single mutex. Observer callbacks are collected
//! under the lock and invoked after it is released, so a callback may call
//! back into the store (read an entry, unsubscribe, ...) without
//! deadlocking.
//!
//! # Change notification
//!
//! Observers are notified when an entry's status, data, error, fetching
//! flag, retry count or invalidation flag changes. A fetch returning data
//! equal to what is cached keeps the existing `Arc` and does not notify.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::{CacheConfig, CacheEntry, QueryStatus, RetentionClass};
use crate::telemetry;
use crate::types::{Fingerprint, Scope, Table};
use crate::{Result, SyncError};

/// Change callback registered by a consumer.
pub type OnChange = Arc<dyn Fn(&CacheEntry) + Send + Sync>;

/// Handle returned by [`CacheStore::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverToken(u64);

struct Observer {
    fingerprint: Fingerprint,
    on_change: OnChange,
}

#[derive(Default)]
struct StoreState {
    entries: HashMap<Fingerprint, CacheEntry>,
    observers: HashMap<ObserverToken, Observer>,
    next_observer: u64,
}

/// Entry matched by an invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidatedEntry {
    pub fingerprint: Fingerprint,
    pub subscriber_count: usize,
}

/// Key-value store of cache entries with per-fingerprint observers.
pub struct CacheStore {
    config: CacheConfig,
    state: Mutex<StoreState>,
}

impl fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("config", &self.config)
            .field("entries", &self.len())
            .finish()
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl CacheStore {
    /// Create an empty store with the given retention windows.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            state: Mutex::new(StoreState::default()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        // A panicking observer runs outside the lock, so poisoning can only
        // come from a bug inside this module; the map is still consistent.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of the entry for a fingerprint.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        self.lock().entries.get(fingerprint).cloned()
    }

    /// Replace the entry for a fingerprint.
    ///
    /// The subscriber count belongs to the live subscriptions and is kept
    /// from the existing entry. If the new data equals the cached data the
    /// existing `Arc` is kept.
    pub fn put(&self, fingerprint: Fingerprint, mut entry: CacheEntry) {
        entry.fingerprint = fingerprint.clone();
        self.update(&fingerprint, move |current| {
            entry.subscriber_count = current.subscriber_count;
            entry.unobserved_since = current.unobserved_since;
            entry.issued_token = current.issued_token.max(entry.issued_token);
            entry.applied_token = current.applied_token.max(entry.applied_token);
            entry.invalidated_at = current.invalidated_at.max(entry.invalidated_at);
            if let (Some(old), Some(new)) = (&current.data, &entry.data) {
                if old == new {
                    entry.data = Some(Arc::clone(old));
                }
            }
            let changed = differs(current, &entry);
            *current = entry;
            changed
        });
    }

    /// Number of live subscriptions on a fingerprint.
    pub fn subscriber_count(&self, fingerprint: &Fingerprint) -> usize {
        self.lock()
            .entries
            .get(fingerprint)
            .map_or(0, |e| e.subscriber_count)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All cached fingerprints, sorted.
    pub fn fingerprints(&self) -> Vec<Fingerprint> {
        let mut fps: Vec<_> = self.lock().entries.keys().cloned().collect();
        fps.sort();
        fps
    }

    // ===== Observers =====

    /// Register a change callback and count one subscriber.
    ///
    /// Creates an idle entry if none exists yet.
    pub fn register(&self, fingerprint: &Fingerprint, on_change: OnChange) -> ObserverToken {
        let mut state = self.lock();
        let token = ObserverToken(state.next_observer);
        state.next_observer += 1;
        let entry = state
            .entries
            .entry(fingerprint.clone())
            .or_insert_with(|| CacheEntry::new(fingerprint.clone()));
        entry.subscriber_count += 1;
        entry.unobserved_since = None;
        trace!(fingerprint = %fingerprint, subscribers = entry.subscriber_count, "observer registered");
        state.observers.insert(
            token,
            Observer {
                fingerprint: fingerprint.clone(),
                on_change,
            },
        );
        token
    }

    /// Remove a callback and its subscriber count.
    ///
    /// Returns `false` if the token was already unregistered; the count is
    /// never decremented twice for one token.
    pub fn unregister(&self, token: ObserverToken) -> bool {
        let mut state = self.lock();
        let Some(observer) = state.observers.remove(&token) else {
            return false;
        };
        if let Some(entry) = state.entries.get_mut(&observer.fingerprint) {
            entry.subscriber_count = entry.subscriber_count.saturating_sub(1);
            if entry.subscriber_count == 0 {
                entry.unobserved_since = Some(Instant::now());
            }
            trace!(fingerprint = %observer.fingerprint, subscribers = entry.subscriber_count, "observer unregistered");
        }
        true
    }

    /// Register a callback and get a guard that unregisters it on drop.
    pub fn subscribe(
        self: &Arc<Self>,
        fingerprint: &Fingerprint,
        on_change: impl Fn(&CacheEntry) + Send + Sync + 'static,
    ) -> Subscription {
        let token = self.register(fingerprint, Arc::new(on_change));
        Subscription {
            store: Arc::clone(self),
            fingerprint: fingerprint.clone(),
            token: Some(token),
        }
    }

    // ===== Invalidation and eviction =====

    /// Mark every entry in scope as invalidated.
    ///
    /// Returns the matched entries with their subscriber counts; the
    /// executor re-fetches those that are observed.
    pub fn mark_invalidated(&self, scope: &Scope) -> Vec<InvalidatedEntry> {
        let mut matched = Vec::new();
        let mut pending = Vec::new();
        {
            let mut state = self.lock();
            let StoreState {
                entries, observers, ..
            } = &mut *state;
            for entry in entries.values_mut() {
                if !in_scope(entry, scope) {
                    continue;
                }
                matched.push(InvalidatedEntry {
                    fingerprint: entry.fingerprint.clone(),
                    subscriber_count: entry.subscriber_count,
                });
                // Fetches issued up to now started before the invalidation.
                entry.invalidated_at = entry.issued_token;
                if !entry.invalidated {
                    entry.invalidated = true;
                    pending.extend(callbacks_for(observers, entry));
                }
            }
        }
        notify(pending);
        matched.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        matched
    }

    /// Drop entries that have had no subscriber for longer than their
    /// class's retention window. Entries with a fetch in flight are kept.
    ///
    /// Returns the evicted fingerprints.
    pub fn evict_stale(&self) -> Vec<Fingerprint> {
        let now = Instant::now();
        let mut state = self.lock();
        let mut evicted = Vec::new();
        state.entries.retain(|fp, entry| {
            let gc_time = self.config.policy(entry.class).gc_time;
            let expired = entry.subscriber_count == 0
                && !entry.fetching
                && entry
                    .unobserved_since
                    .is_some_and(|since| now.saturating_duration_since(since) >= gc_time);
            if expired {
                evicted.push(fp.clone());
            }
            !expired
        });
        drop(state);
        if !evicted.is_empty() {
            metrics::counter!(telemetry::EVICTIONS_TOTAL).increment(evicted.len() as u64);
            debug!(count = evicted.len(), "evicted unused cache entries");
        }
        evicted.sort();
        evicted
    }

    // ===== Executor hooks =====

    /// Create the entry if needed and record the query's tables and class.
    pub(crate) fn declare(&self, fingerprint: &Fingerprint, tables: &[Table], class: RetentionClass) {
        let mut state = self.lock();
        let entry = state
            .entries
            .entry(fingerprint.clone())
            .or_insert_with(|| CacheEntry::new(fingerprint.clone()));
        entry.tables.extend(tables.iter().copied());
        entry.class = class;
    }

    /// Record that fetch `token` was issued, before its task runs.
    ///
    /// Observers are not notified; [`begin_fetch`](Self::begin_fetch)
    /// publishes the fetching state once the task starts.
    pub(crate) fn issue(&self, fingerprint: &Fingerprint, token: u64) {
        let mut state = self.lock();
        let entry = state
            .entries
            .entry(fingerprint.clone())
            .or_insert_with(|| CacheEntry::new(fingerprint.clone()));
        entry.issued_token = entry.issued_token.max(token);
    }

    /// Record that fetch `token` started.
    ///
    /// Ignored when a newer fetch has already been applied; that fetch's
    /// result will be discarded anyway.
    pub(crate) fn begin_fetch(&self, fingerprint: &Fingerprint, token: u64) {
        self.update(fingerprint, |entry| {
            if token <= entry.applied_token {
                return false;
            }
            let before = entry.clone();
            entry.issued_token = entry.issued_token.max(token);
            entry.fetching = true;
            entry.failure_count = 0;
            if entry.data.is_none() {
                entry.status = QueryStatus::Loading;
            }
            differs(&before, entry)
        });
    }

    /// Record a transient failure of fetch `token` that will be retried.
    pub(crate) fn record_retry(&self, fingerprint: &Fingerprint, token: u64, attempt: u32) {
        self.update(fingerprint, |entry| {
            if token != entry.issued_token {
                return false;
            }
            entry.failure_count = attempt;
            true
        });
    }

    /// Apply the outcome of fetch `token`.
    ///
    /// Returns `false` when the result was discarded because a newer fetch
    /// has already been applied. Data from a fetch issued before the last
    /// invalidation is stored but the entry stays invalidated.
    pub(crate) fn settle(
        &self,
        fingerprint: &Fingerprint,
        token: u64,
        outcome: &Result<Arc<Value>>,
    ) -> bool {
        let now = Instant::now();
        let mut applied = false;
        self.update(fingerprint, |entry| {
            if token <= entry.applied_token {
                return false;
            }
            applied = true;
            let before = entry.clone();
            entry.applied_token = token;
            if token >= entry.issued_token {
                entry.fetching = false;
                entry.failure_count = 0;
            }
            match outcome {
                Ok(data) => {
                    let stale_time = self.config.policy(entry.class).stale_time;
                    if entry.data.as_ref().is_none_or(|old| old != data) {
                        entry.data = Some(Arc::clone(data));
                    }
                    entry.status = QueryStatus::Success;
                    entry.error = None;
                    entry.last_fetched_at = Some(now);
                    if token > entry.invalidated_at {
                        entry.invalidated = false;
                        entry.stale_after = Some(now + stale_time);
                    }
                }
                Err(e) => {
                    entry.status = QueryStatus::Error;
                    entry.error = Some(e.clone());
                }
            }
            if entry.subscriber_count == 0 {
                entry.unobserved_since = Some(now);
            }
            differs(&before, entry)
        });
        applied
    }

    /// Clear the fetching flag of an entry whose fetch task vanished.
    pub(crate) fn abandon_fetch(&self, fingerprint: &Fingerprint, token: u64, error: &SyncError) {
        self.update(fingerprint, |entry| {
            if token != entry.issued_token || !entry.fetching {
                return false;
            }
            entry.fetching = false;
            entry.failure_count = 0;
            entry.status = QueryStatus::Error;
            entry.error = Some(error.clone());
            true
        });
    }

    /// Apply `f` to an entry (created if missing) and notify observers if
    /// it reports a change.
    fn update<F>(&self, fingerprint: &Fingerprint, f: F)
    where
        F: FnOnce(&mut CacheEntry) -> bool,
    {
        let pending = {
            let mut state = self.lock();
            let StoreState {
                entries, observers, ..
            } = &mut *state;
            let entry = entries
                .entry(fingerprint.clone())
                .or_insert_with(|| CacheEntry::new(fingerprint.clone()));
            if f(entry) {
                callbacks_for(observers, entry)
            } else {
                Vec::new()
            }
        };
        notify(pending);
    }
}

fn in_scope(entry: &CacheEntry, scope: &Scope) -> bool {
    match scope {
        Scope::Prefix(prefix) => entry.fingerprint.starts_with(prefix),
        Scope::Table(table) => {
            entry.tables.contains(table) || entry.fingerprint.root() == table.as_str()
        }
    }
}

/// Whether two states of an entry differ in anything an observer renders.
fn differs(a: &CacheEntry, b: &CacheEntry) -> bool {
    let same_data = match (&a.data, &b.data) {
        (None, None) => true,
        (Some(x), Some(y)) => Arc::ptr_eq(x, y),
        _ => false,
    };
    !same_data
        || a.status != b.status
        || a.error != b.error
        || a.invalidated != b.invalidated
        || a.fetching != b.fetching
        || a.failure_count != b.failure_count
}

fn callbacks_for(
    observers: &HashMap<ObserverToken, Observer>,
    entry: &CacheEntry,
) -> Vec<(OnChange, CacheEntry)> {
    observers
        .values()
        .filter(|o| o.fingerprint == entry.fingerprint)
        .map(|o| (Arc::clone(&o.on_change), entry.clone()))
        .collect()
}

fn notify(pending: Vec<(OnChange, CacheEntry)>) {
    for (on_change, entry) in pending {
        on_change(&entry);
    }
}

/// A live binding from one consumer to one fingerprint.
///
/// Holds one subscriber count and one change callback; both are released
/// by [`unsubscribe`](Self::unsubscribe) or on drop.
pub struct Subscription {
    store: Arc<CacheStore>,
    fingerprint: Fingerprint,
    token: Option<ObserverToken>,
}

impl Subscription {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Current snapshot of the subscribed entry.
    pub fn entry(&self) -> Option<CacheEntry> {
        self.store.get(&self.fingerprint)
    }

    /// Release the subscription now.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(token) = self.token.take() {
            self.store.unregister(token);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("fingerprint", &self.fingerprint)
            .field("active", &self.token.is_some())
            .finish()
    }
}
