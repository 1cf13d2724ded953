//! Cache entries.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::Instant;

use super::RetentionClass;
use crate::types::{Fingerprint, Table};
use crate::{Result, SyncError};

/// Lifecycle status of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QueryStatus {
    /// Never fetched.
    #[default]
    Idle,
    /// First fetch in progress, no data yet.
    Loading,
    /// Holds data from the last applied fetch.
    Success,
    /// The last applied fetch failed after its retries.
    Error,
}

/// Cached result plus metadata for one fingerprint.
///
/// `data` is an `Arc` that is replaced only when the fetched value differs
/// from the cached one, so `Arc::ptr_eq` tells a consumer whether anything
/// changed.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub data: Option<Arc<Value>>,
    pub status: QueryStatus,
    pub error: Option<SyncError>,
    pub last_fetched_at: Option<Instant>,
    pub stale_after: Option<Instant>,
    pub subscriber_count: usize,
    /// Set by an invalidation; cleared by the next applied fetch.
    pub invalidated: bool,
    /// A fetch for this entry is running (first load or background refresh).
    pub fetching: bool,
    /// Failed attempts of the running fetch; non-zero means a retry is pending.
    pub failure_count: u32,
    /// Tables this query reads, for table-scoped invalidation.
    pub tables: BTreeSet<Table>,
    pub class: RetentionClass,
    pub(crate) unobserved_since: Option<Instant>,
    pub(crate) issued_token: u64,
    pub(crate) applied_token: u64,
    /// Newest token issued when the entry was last invalidated. Only a
    /// fetch with a higher token may clear `invalidated`.
    pub(crate) invalidated_at: u64,
}

impl CacheEntry {
    pub fn new(fingerprint: Fingerprint) -> Self {
        Self {
            fingerprint,
            data: None,
            status: QueryStatus::Idle,
            error: None,
            last_fetched_at: None,
            stale_after: None,
            subscriber_count: 0,
            invalidated: false,
            fetching: false,
            failure_count: 0,
            tables: BTreeSet::new(),
            class: RetentionClass::default(),
            unobserved_since: Some(Instant::now()),
            issued_token: 0,
            applied_token: 0,
            invalidated_at: 0,
        }
    }

    /// Entry holding successfully fetched data, as a caller seeding the
    /// cache through [`CacheStore::put`](super::CacheStore::put) would build it.
    pub fn with_data(fingerprint: Fingerprint, data: Value, stale_after: Instant) -> Self {
        let now = Instant::now();
        Self {
            data: Some(Arc::new(data)),
            status: QueryStatus::Success,
            last_fetched_at: Some(now),
            stale_after: Some(stale_after),
            ..Self::new(fingerprint)
        }
    }

    /// Data may be served without re-validation.
    pub fn is_fresh(&self, now: Instant) -> bool {
        self.status == QueryStatus::Success
            && !self.invalidated
            && self.stale_after.is_some_and(|at| now < at)
    }

    /// A transient failure occurred and the fetch is backing off before
    /// another attempt.
    pub fn is_retrying(&self) -> bool {
        self.fetching && self.failure_count > 0
    }

    /// Deserialize the cached data.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        self.data
            .as_deref()
            .map(|v| T::deserialize(v).map_err(SyncError::from))
            .transpose()
    }
}
