//! Retry configuration, delay calculation, and the shared retry helper.
//!
//! [`RetryConfig`] controls how reads are retried on transient errors and
//! how the realtime bridge spaces its reconnection attempts. Writes never
//! go through here: they are not assumed idempotent.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::telemetry;
use crate::{Result, SyncError};

/// How many times a read is attempted and how long to wait in between.
///
/// Delays double from `initial_delay` up to `max_delay`:
///
/// ```rust
/// # use tuile::RetryConfig;
/// # use std::time::Duration;
/// let config = RetryConfig::new()
///     .max_attempts(5)
///     .initial_delay(Duration::from_millis(200));
/// assert_eq!(config.delay_for_attempt(1), Duration::from_millis(400));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Attempts per fetch, the first one included. 1 disables retries.
    /// Default: 3.
    pub max_attempts: u32,
    /// Wait before the second attempt. Default: 1s.
    pub initial_delay: Duration,
    /// Upper bound for any single wait. Default: 30s.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// One attempt, no retries.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Attempts per fetch; values below 1 are raised to 1.
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n.max(1);
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Wait after failed attempt `attempt` (0-based):
    /// `initial_delay * 2^attempt`, at most `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        delay.min(self.max_delay)
    }

    /// Like [`delay_for_attempt`](Self::delay_for_attempt), but a server
    /// `Retry-After` hint wins when present.
    pub fn effective_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        retry_after.unwrap_or_else(|| self.delay_for_attempt(attempt))
    }
}

/// Run `f` until it succeeds, fails terminally or `config.max_attempts`
/// is used up.
///
/// Only [`SyncError::is_transient`] errors are retried. `on_retry` gets
/// the 1-based number of each failed attempt before the wait, which is
/// how the executor exposes a retry-in-progress entry.
pub(crate) async fn with_retry<F, Fut, T, R>(
    config: &RetryConfig,
    query: &str,
    operation: &str,
    f: F,
    mut on_retry: R,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
    R: FnMut(u32, &SyncError),
{
    let mut last_err = None;
    for attempt in 0..config.max_attempts {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_transient() => {
                if attempt + 1 < config.max_attempts {
                    metrics::counter!(telemetry::RETRIES_TOTAL,
                        "query" => query.to_owned(),
                        "operation" => operation.to_owned(),
                    )
                    .increment(1);
                    let delay = config.effective_delay(attempt, e.retry_after());
                    warn!(
                        query,
                        operation,
                        attempt = attempt + 1,
                        max_attempts = config.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient fetch failure, backing off"
                    );
                    on_retry(attempt + 1, &e);
                    tokio::time::sleep(delay).await;
                }
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| SyncError::Aborted("no attempt was made".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryConfig {
        RetryConfig::new()
            .max_attempts(3)
            .initial_delay(Duration::from_millis(1))
    }

    #[test]
    fn delay_doubles_and_caps() {
        let config = RetryConfig::new()
            .initial_delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(350));
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(config.delay_for_attempt(40), Duration::from_millis(350));
    }

    #[test]
    fn retry_after_overrides_backoff() {
        let config = RetryConfig::new();
        let hint = Duration::from_millis(7);
        assert_eq!(config.effective_delay(3, Some(hint)), hint);
    }

    #[test]
    fn max_attempts_is_at_least_one() {
        assert_eq!(RetryConfig::new().max_attempts(0).max_attempts, 1);
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let mut retries = Vec::new();
        let result = with_retry(
            &fast(),
            "q",
            "fetch",
            || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(SyncError::Http("reset".into()))
                } else {
                    Ok(42)
                }
            },
            |attempt, _| retries.push(attempt),
        )
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(retries, vec![1, 2]);
    }

    #[tokio::test]
    async fn terminal_error_is_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = with_retry(
            &fast(),
            "q",
            "fetch",
            || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(SyncError::PermissionDenied("rls".into()))
            },
            |_, _| {},
        )
        .await;
        assert!(matches!(result, Err(SyncError::PermissionDenied(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_with_last_transient_error() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = with_retry(
            &fast(),
            "q",
            "fetch",
            || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Err(SyncError::Http(format!("attempt {n}")))
            },
            |_, _| {},
        )
        .await;
        assert_eq!(result, Err(SyncError::Http("attempt 2".into())));
    }
}
