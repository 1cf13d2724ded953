//! Realtime bridge: turns server-pushed change events into cache
//! invalidations.
//!
//! Each [`RealtimeBridge::open`] starts one channel for one table. While
//! connected, every change event on that table invalidates the entries
//! that depend on it. On a transport error the channel reconnects with
//! exponential backoff, a bounded number of times; meanwhile the cache
//! keeps serving what it has.

mod channel;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub use channel::{ChannelHandle, ChannelState};

use crate::backend::RealtimeService;
use crate::query::QueryExecutor;
use crate::retry::RetryConfig;
use crate::types::Table;

/// Realtime settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeConfig {
    /// Backoff between reconnection attempts; `max_attempts` bounds the
    /// consecutive failed connections before the channel gives up.
    pub reconnect: RetryConfig,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            reconnect: RetryConfig::new()
                .max_attempts(10)
                .initial_delay(Duration::from_secs(1))
                .max_delay(Duration::from_secs(30)),
        }
    }
}

impl RealtimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reconnect(mut self, reconnect: RetryConfig) -> Self {
        self.reconnect = reconnect;
        self
    }
}

/// Opens realtime channels that invalidate through a [`QueryExecutor`].
#[derive(Clone)]
pub struct RealtimeBridge {
    service: Arc<dyn RealtimeService>,
    executor: QueryExecutor,
    config: RealtimeConfig,
}

impl fmt::Debug for RealtimeBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeBridge")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RealtimeBridge {
    pub fn new(
        service: Arc<dyn RealtimeService>,
        executor: QueryExecutor,
        config: RealtimeConfig,
    ) -> Self {
        Self {
            service,
            executor,
            config,
        }
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    /// Open a channel for `table`.
    ///
    /// Returns immediately in state `Connecting`; use
    /// [`ChannelHandle::wait_until`] to wait for the handshake.
    pub fn open(&self, table: Table) -> ChannelHandle {
        channel::spawn(
            Arc::clone(&self.service),
            self.executor.clone(),
            self.config.clone(),
            table,
        )
    }
}
