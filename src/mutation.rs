//! Mutation coordinator.
//!
//! Runs a write once and, if it succeeds, invalidates the scopes it
//! affects. Writes are not optimistic: the cache only changes through the
//! re-fetches the invalidation triggers.

use std::future::Future;

use tracing::{debug, warn};

use crate::query::QueryExecutor;
use crate::telemetry;
use crate::types::{InvalidationReason, InvalidationSignal, Scope};
use crate::Result;

/// Runs writes and invalidates what they affect.
#[derive(Debug, Clone)]
pub struct MutationCoordinator {
    executor: QueryExecutor,
}

impl MutationCoordinator {
    pub fn new(executor: QueryExecutor) -> Self {
        Self { executor }
    }

    /// Execute `write` exactly once.
    ///
    /// On success, emits one invalidation per scope in `affected` and
    /// waits for the re-fetches of observed entries before returning, so
    /// that subscribers already see the new data. On failure the error is
    /// returned unchanged and the cache is left untouched.
    pub async fn perform<T, W, Fut>(&self, label: &str, write: W, affected: &[Scope]) -> Result<T>
    where
        W: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match write().await {
            Ok(value) => {
                metrics::counter!(telemetry::MUTATIONS_TOTAL,
                    "mutation" => label.to_owned(),
                    "status" => "ok",
                )
                .increment(1);
                debug!(mutation = label, scopes = affected.len(), "write succeeded");
                for scope in affected {
                    self.executor
                        .invalidate(InvalidationSignal::new(
                            scope.clone(),
                            InvalidationReason::Mutation,
                        ))
                        .await;
                }
                Ok(value)
            }
            Err(e) => {
                metrics::counter!(telemetry::MUTATIONS_TOTAL,
                    "mutation" => label.to_owned(),
                    "status" => "error",
                )
                .increment(1);
                warn!(mutation = label, error = %e, "write failed");
                telemetry::report_error(&e, label, &[]);
                Err(e)
            }
        }
    }
}
