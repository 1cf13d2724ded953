//! The query executor: serves reads from the cache and drives fetches.
//!
//! # Coalescing
//!
//! At most one fetch per fingerprint is current. A caller arriving while
//! it runs awaits the same shared future instead of issuing another
//! request.
//!
//! # Ordering
//!
//! Every fetch gets a token from one monotonically increasing counter,
//! recorded on the entry before the fetch task is spawned. The store
//! applies a result only if its token is newer than the last applied one,
//! so a slow fetch that finishes after a newer one is discarded. A result
//! whose token predates the entry's last invalidation is kept as data but
//! leaves the entry stale.
//!
//! # Cancellation
//!
//! Fetches run as their own tokio tasks. Dropping every caller's future
//! does not cancel the fetch; its result is still cached.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared, join_all};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

use super::QueryKey;
use crate::cache::CacheStore;
use crate::retry::{RetryConfig, with_retry};
use crate::telemetry;
use crate::types::{Fingerprint, InvalidationSignal};
use crate::{Result, SyncError};

/// A re-runnable fetch for one fingerprint.
pub type FetchFn = Arc<dyn Fn() -> BoxFuture<'static, Result<Value>> + Send + Sync>;

type SharedFetch = Shared<BoxFuture<'static, Result<Arc<Value>>>>;

struct InFlight {
    token: u64,
    fetch: SharedFetch,
}

#[derive(Default)]
struct ExecutorState {
    in_flight: HashMap<Fingerprint, InFlight>,
    /// Last fetch registered per fingerprint, re-run on invalidation.
    fetchers: HashMap<Fingerprint, FetchFn>,
}

struct Inner {
    store: Arc<CacheStore>,
    retry: RetryConfig,
    state: Mutex<ExecutorState>,
    next_token: AtomicU64,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, ExecutorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Drop the in-flight record of `token` unless a newer fetch replaced it.
    fn finish(&self, fingerprint: &Fingerprint, token: u64) {
        let mut state = self.lock();
        if state
            .in_flight
            .get(fingerprint)
            .is_some_and(|f| f.token == token)
        {
            state.in_flight.remove(fingerprint);
        }
    }

    async fn run_fetch(
        self: Arc<Self>,
        fingerprint: Fingerprint,
        token: u64,
        fetch: FetchFn,
    ) -> Result<Arc<Value>> {
        let query = fingerprint.root().to_string();
        self.store.begin_fetch(&fingerprint, token);
        debug!(fingerprint = %fingerprint, token, "fetch started");

        let started = Instant::now();
        let store = &self.store;
        let attempts = with_retry(
            &self.retry,
            &query,
            "fetch",
            || fetch(),
            |attempt, _| store.record_retry(&fingerprint, token, attempt),
        );
        let outcome = AssertUnwindSafe(attempts)
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(SyncError::Aborted(format!("fetch for {fingerprint} panicked"))))
            .map(Arc::new);

        metrics::histogram!(telemetry::FETCH_DURATION_SECONDS, "query" => query.clone())
            .record(started.elapsed().as_secs_f64());
        let status = if outcome.is_ok() { "ok" } else { "error" };
        metrics::counter!(telemetry::FETCHES_TOTAL, "query" => query.clone(), "status" => status)
            .increment(1);

        if self.store.settle(&fingerprint, token, &outcome) {
            if let Err(e) = &outcome {
                warn!(fingerprint = %fingerprint, error = %e, "fetch failed");
                let fingerprint = fingerprint.to_string();
                telemetry::report_error(e, "fetch", &[("fingerprint", &fingerprint)]);
            }
        } else {
            metrics::counter!(telemetry::DISCARDED_RESULTS_TOTAL, "query" => query).increment(1);
            debug!(fingerprint = %fingerprint, token, "discarded result of superseded fetch");
        }
        self.finish(&fingerprint, token);
        outcome
    }
}

/// Outcome of [`QueryExecutor::invalidate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationReport {
    /// Entries marked stale.
    pub matched: Vec<Fingerprint>,
    /// Observed entries that were re-fetched.
    pub refetched: Vec<Fingerprint>,
}

/// Runs fetches against the [`CacheStore`].
///
/// Cheap to clone; clones share the same in-flight table.
#[derive(Clone)]
pub struct QueryExecutor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for QueryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExecutor")
            .field("retry", &self.inner.retry)
            .field("in_flight", &self.inner.lock().in_flight.len())
            .finish()
    }
}

impl QueryExecutor {
    pub fn new(store: Arc<CacheStore>, retry: RetryConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                retry,
                state: Mutex::new(ExecutorState::default()),
                next_token: AtomicU64::new(0),
            }),
        }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.inner.store
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.inner.retry
    }

    /// Return the data for `key`, fetching it if needed.
    ///
    /// A fresh entry is returned without calling `fetch`. If a fetch for
    /// the fingerprint is already running, this awaits it. Otherwise a new
    /// fetch is started, retried on transient errors, and its outcome is
    /// cached and returned.
    ///
    /// `fetch` is remembered for the fingerprint so that invalidations can
    /// re-run it.
    pub async fn ensure<F, Fut>(&self, key: QueryKey, fetch: F) -> Result<Arc<Value>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let fetch: FetchFn = Arc::new(move || fetch().boxed());
        self.ensure_with(key, fetch).await
    }

    /// [`ensure`](Self::ensure), deserializing the data.
    pub async fn ensure_as<T, F, Fut>(&self, key: QueryKey, fetch: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let data = self.ensure(key, fetch).await?;
        Ok(T::deserialize(&*data)?)
    }

    pub(crate) async fn ensure_with(&self, key: QueryKey, fetch: FetchFn) -> Result<Arc<Value>> {
        let QueryKey {
            fingerprint,
            tables,
            class,
        } = key;
        let store = &self.inner.store;
        store.declare(&fingerprint, &tables, class);

        let pending = {
            let mut state = self.inner.lock();
            state
                .fetchers
                .insert(fingerprint.clone(), Arc::clone(&fetch));

            let entry = store.get(&fingerprint);
            let fresh = entry
                .as_ref()
                .filter(|entry| entry.is_fresh(Instant::now()))
                .and_then(|entry| entry.data.clone());
            if let Some(data) = fresh {
                metrics::counter!(telemetry::CACHE_HITS_TOTAL, "query" => fingerprint.root().to_string())
                    .increment(1);
                trace!(fingerprint = %fingerprint, "cache hit");
                return Ok(data);
            }

            // A fetch issued before the last invalidation may return
            // pre-write data; do not join it.
            let invalidated_at = entry
                .filter(|entry| entry.invalidated)
                .map_or(0, |entry| entry.invalidated_at);
            let joinable = state
                .in_flight
                .get(&fingerprint)
                .filter(|in_flight| in_flight.token > invalidated_at);
            if let Some(in_flight) = joinable {
                metrics::counter!(telemetry::COALESCED_TOTAL, "query" => fingerprint.root().to_string())
                    .increment(1);
                trace!(fingerprint = %fingerprint, token = in_flight.token, "joining in-flight fetch");
                in_flight.fetch.clone()
            } else {
                metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "query" => fingerprint.root().to_string())
                    .increment(1);
                self.start_fetch(&mut state, &fingerprint, fetch)
            }
        };
        pending.await
    }

    /// Spawn a fetch with a new token and make it the current one.
    fn start_fetch(
        &self,
        state: &mut ExecutorState,
        fingerprint: &Fingerprint,
        fetch: FetchFn,
    ) -> SharedFetch {
        let token = self.inner.next_token.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.store.issue(fingerprint, token);
        let task = tokio::spawn(Arc::clone(&self.inner).run_fetch(
            fingerprint.clone(),
            token,
            fetch,
        ));

        let inner = Arc::downgrade(&self.inner);
        let fp = fingerprint.clone();
        let shared = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let err = SyncError::Aborted(e.to_string());
                    if let Some(inner) = Weak::upgrade(&inner) {
                        inner.store.abandon_fetch(&fp, token, &err);
                        inner.finish(&fp, token);
                    }
                    Err(err)
                }
            }
        }
        .boxed()
        .shared();

        state.in_flight.insert(
            fingerprint.clone(),
            InFlight {
                token,
                fetch: shared.clone(),
            },
        );
        shared
    }

    /// Whether a fetch for `fingerprint` is currently running.
    pub fn is_fetching(&self, fingerprint: &Fingerprint) -> bool {
        self.inner.lock().in_flight.contains_key(fingerprint)
    }

    /// Mark every entry in the signal's scope stale and re-fetch the ones
    /// with subscribers, superseding any fetch already running for them.
    ///
    /// Completes when those re-fetches have settled. Entries without
    /// subscribers are only marked; they are fetched again on their next
    /// `ensure`.
    pub async fn invalidate(&self, signal: InvalidationSignal) -> InvalidationReport {
        metrics::counter!(telemetry::INVALIDATIONS_TOTAL, "reason" => signal.reason.label())
            .increment(1);
        let matched = self.inner.store.mark_invalidated(&signal.scope);

        let mut refetched = Vec::new();
        let pending: Vec<SharedFetch> = {
            let mut state = self.inner.lock();
            let mut pending = Vec::new();
            for entry in matched.iter().filter(|e| e.subscriber_count > 0) {
                let Some(fetch) = state.fetchers.get(&entry.fingerprint).cloned() else {
                    trace!(fingerprint = %entry.fingerprint, "observed entry has no fetcher yet");
                    continue;
                };
                pending.push(self.start_fetch(&mut state, &entry.fingerprint, fetch));
                refetched.push(entry.fingerprint.clone());
            }
            pending
        };

        debug!(
            scope = %signal.scope,
            reason = signal.reason.label(),
            matched = matched.len(),
            refetched = refetched.len(),
            "invalidated"
        );
        // Failures are recorded on the entries.
        join_all(pending).await;

        InvalidationReport {
            matched: matched.into_iter().map(|e| e.fingerprint).collect(),
            refetched,
        }
    }

    /// Evict unobserved entries past their retention window, forgetting
    /// their fetchers too.
    pub fn evict_stale(&self) -> Vec<Fingerprint> {
        let evicted = self.inner.store.evict_stale();
        if !evicted.is_empty() {
            let mut state = self.inner.lock();
            for fingerprint in &evicted {
                state.fetchers.remove(fingerprint);
            }
        }
        evicted
    }

    /// Run [`evict_stale`](Self::evict_stale) every `period` in the
    /// background. The task ends once every executor clone is dropped.
    pub fn spawn_gc(&self, period: Duration) -> JoinHandle<()> {
        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                QueryExecutor { inner }.evict_stale();
            }
        })
    }
}
