//! Caching subsystem.
//!
//! - [`CacheStore`]: the single shared map from [`Fingerprint`](crate::Fingerprint)
//!   to [`CacheEntry`], with observer registration and eviction.
//! - [`CacheConfig`]: stale and garbage-collection windows per
//!   [`RetentionClass`].
//!
//! The store never fetches anything itself; the
//! [`QueryExecutor`](crate::query::QueryExecutor) drives it.

mod entry;
mod policy;
mod store;

pub use entry::{CacheEntry, QueryStatus};
pub use policy::{CacheConfig, RetentionClass, RetentionPolicy};
pub use store::{CacheStore, InvalidatedEntry, ObserverToken, OnChange, Subscription};
