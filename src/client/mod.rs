//! The sync client: one cache, one executor, one mutation coordinator and
//! an optional realtime bridge, wired to a backend.
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use tuile::{MemoryBackend, Table, Tuile};
//! # async fn example() -> tuile::Result<()> {
//! let backend = Arc::new(MemoryBackend::new());
//! let client = Tuile::builder().memory(backend).build()?;
//!
//! let _channel = client.realtime(Table::Chantiers)?;
//! let by_status = client.leads_by_status().await?;
//! # Ok(())
//! # }
//! ```

mod builder;

pub use builder::{SyncClientBuilder, Tuile};

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::backend::{DataService, RoleProvider};
use crate::cache::{CacheEntry, CacheStore, Subscription};
use crate::config::TuileConfig;
use crate::mutation::MutationCoordinator;
use crate::query::{FetchFn, InvalidationReport, QueryExecutor, QueryKey};
use crate::realtime::{ChannelHandle, RealtimeBridge};
use crate::types::{InvalidationSignal, Scope, Table};
use crate::views::ViewQuery;
use crate::{Result, SyncError};

/// Client-side data synchronization for the back office.
///
/// Cheap to clone; clones share the cache.
#[derive(Clone)]
pub struct SyncClient {
    pub(crate) store: Arc<CacheStore>,
    pub(crate) executor: QueryExecutor,
    pub(crate) mutations: MutationCoordinator,
    pub(crate) bridge: Option<RealtimeBridge>,
    pub(crate) data: Arc<dyn DataService>,
    pub(crate) roles: Option<Arc<dyn RoleProvider>>,
    pub(crate) user_id: String,
}

impl fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncClient")
            .field("backend", &self.data.name())
            .field("user_id", &self.user_id)
            .field("entries", &self.store.len())
            .field("realtime", &self.bridge.is_some())
            .finish()
    }
}

impl SyncClient {
    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    pub fn mutations(&self) -> &MutationCoordinator {
        &self.mutations
    }

    pub fn data(&self) -> &Arc<dyn DataService> {
        &self.data
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// See [`QueryExecutor::ensure`].
    pub async fn ensure<F, Fut>(&self, key: QueryKey, fetch: F) -> Result<Arc<Value>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.executor.ensure(key, fetch).await
    }

    /// Subscribe to `key` and fetch it in the background unless the cache
    /// already holds fresh data.
    ///
    /// `on_change` runs on every change of the entry. The subscription is
    /// counted before the fetch starts, so an invalidation racing with the
    /// first load already sees it.
    pub fn watch<F, Fut>(
        &self,
        key: QueryKey,
        fetch: F,
        on_change: impl Fn(&CacheEntry) + Send + Sync + 'static,
    ) -> Subscription
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let fetch: FetchFn = Arc::new(move || fetch().boxed());
        self.watch_with(key, fetch, on_change)
    }

    /// Load a view, from the cache when fresh.
    pub async fn load<T: DeserializeOwned>(&self, view: ViewQuery<T>) -> Result<T> {
        let data = self.executor.ensure_with(view.key, view.fetch).await?;
        Ok(T::deserialize(&*data)?)
    }

    /// [`watch`](Self::watch) for a view.
    pub fn watch_view<T>(
        &self,
        view: ViewQuery<T>,
        on_change: impl Fn(&CacheEntry) + Send + Sync + 'static,
    ) -> Subscription {
        self.watch_with(view.key, view.fetch, on_change)
    }

    fn watch_with(
        &self,
        key: QueryKey,
        fetch: FetchFn,
        on_change: impl Fn(&CacheEntry) + Send + Sync + 'static,
    ) -> Subscription {
        let subscription = self.store.subscribe(&key.fingerprint, on_change);
        let executor = self.executor.clone();
        tokio::spawn(async move {
            let fingerprint = key.fingerprint.clone();
            // The outcome is recorded on the entry the subscriber observes.
            if let Err(e) = executor.ensure_with(key, fetch).await {
                debug!(fingerprint = %fingerprint, error = %e, "initial load failed");
            }
        });
        subscription
    }

    /// Invalidate a scope by hand.
    pub async fn invalidate(&self, scope: impl Into<Scope>) -> InvalidationReport {
        self.executor
            .invalidate(InvalidationSignal::manual(scope))
            .await
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// See [`MutationCoordinator::perform`].
    pub async fn perform<T, W, Fut>(&self, label: &str, write: W, affected: &[Scope]) -> Result<T>
    where
        W: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.mutations.perform(label, write, affected).await
    }

    // =========================================================================
    // Realtime and housekeeping
    // =========================================================================

    /// Open a realtime channel that invalidates `table`'s queries on every
    /// change event.
    pub fn realtime(&self, table: Table) -> Result<ChannelHandle> {
        let bridge = self.bridge.as_ref().ok_or_else(|| {
            SyncError::Configuration("no realtime service configured".to_string())
        })?;
        Ok(bridge.open(table))
    }

    /// Open the channels listed under `[realtime]`.
    ///
    /// Returns no handles when realtime is disabled in the config.
    pub fn realtime_from_config(&self, config: &TuileConfig) -> Result<Vec<ChannelHandle>> {
        if !config.realtime.enabled {
            return Ok(Vec::new());
        }
        config
            .realtime
            .tables
            .iter()
            .map(|table| self.realtime(*table))
            .collect()
    }

    /// Evict unused entries every `period` until the client is dropped.
    pub fn spawn_gc(&self, period: Duration) -> JoinHandle<()> {
        self.executor.spawn_gc(period)
    }
}
