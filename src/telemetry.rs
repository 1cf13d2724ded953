//! Telemetry metric name constants.
//!
//! Centralised metric names for tuile operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `tuile_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `query`: root of the fingerprint (e.g. "chantiers", "leadsByStatus")
//! - `status`: "ok" or "error"
//! - `reason`: "mutation", "realtime" or "manual"
//! - `table`: backend table name
//! - `kind`: error variant, see [`SyncError::kind`]
//!
//! # Error reports
//!
//! [`report_error`] is the single place failed reads and writes are
//! reported. It logs at `error` level on the `tuile::errors` target, so an
//! error-tracking layer can subscribe to that target alone.

use tracing::error;

use crate::SyncError;

/// Reads served from a fresh cache entry.
///
/// Labels: `query`.
pub const CACHE_HITS_TOTAL: &str = "tuile_cache_hits_total";

/// Reads that found no entry, or a stale one.
///
/// Labels: `query`.
pub const CACHE_MISSES_TOTAL: &str = "tuile_cache_misses_total";

/// Reads that joined a fetch already in flight instead of issuing one.
///
/// Labels: `query`.
pub const COALESCED_TOTAL: &str = "tuile_coalesced_total";

/// Completed remote fetches (after retries).
///
/// Labels: `query`, `status` ("ok" | "error").
pub const FETCHES_TOTAL: &str = "tuile_fetches_total";

/// Remote fetch duration in seconds, retries included.
///
/// Labels: `query`.
pub const FETCH_DURATION_SECONDS: &str = "tuile_fetch_duration_seconds";

/// Retry attempts (not counting the initial request).
///
/// Labels: `query`, `operation`.
pub const RETRIES_TOTAL: &str = "tuile_retries_total";

/// Fetch results dropped because a newer fetch was issued after them.
///
/// Labels: `query`.
pub const DISCARDED_RESULTS_TOTAL: &str = "tuile_discarded_results_total";

/// Invalidation signals processed.
///
/// Labels: `reason`.
pub const INVALIDATIONS_TOTAL: &str = "tuile_invalidations_total";

/// Writes performed through the mutation coordinator.
///
/// Labels: `mutation`, `status` ("ok" | "error").
pub const MUTATIONS_TOTAL: &str = "tuile_mutations_total";

/// Change events received from the realtime feed.
///
/// Labels: `table`, `operation`.
pub const REALTIME_EVENTS_TOTAL: &str = "tuile_realtime_events_total";

/// Realtime reconnection attempts.
///
/// Labels: `table`.
pub const REALTIME_RECONNECTS_TOTAL: &str = "tuile_realtime_reconnects_total";

/// Cache entries evicted after their retention window.
pub const EVICTIONS_TOTAL: &str = "tuile_evictions_total";

/// Errors passed to [`report_error`] and not filtered out.
///
/// Labels: `kind`, `operation`.
pub const ERRORS_REPORTED_TOTAL: &str = "tuile_errors_reported_total";

/// Report a failed operation with its context.
///
/// Network failures are dropped: they are expected on flaky connections
/// and the retry and reconnect paths already log them. Returns whether
/// the error was reported.
pub fn report_error(error: &SyncError, operation: &str, context: &[(&str, &str)]) -> bool {
    if error.is_network() {
        return false;
    }
    metrics::counter!(ERRORS_REPORTED_TOTAL,
        "kind" => error.kind(),
        "operation" => operation.to_owned(),
    )
    .increment(1);
    error!(
        target: "tuile::errors",
        kind = error.kind(),
        operation,
        context = ?context,
        error = %error,
        "operation failed"
    );
    true
}
