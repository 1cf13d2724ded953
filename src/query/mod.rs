//! Query execution.
//!
//! [`QueryExecutor`] sits between views and the [`CacheStore`](crate::CacheStore):
//! it decides whether a read is served from the cache, joins a running
//! fetch or starts a new one, and re-fetches observed entries when they
//! are invalidated.

mod executor;
mod key;

pub use executor::{FetchFn, InvalidationReport, QueryExecutor};
pub use key::QueryKey;
