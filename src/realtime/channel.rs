//! One realtime channel: the task that holds a table's change feed and the
//! handle that owns it.

use std::fmt;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::RealtimeConfig;
use crate::backend::{ChangeStream, FeedId, RealtimeService};
use crate::query::QueryExecutor;
use crate::telemetry;
use crate::types::{InvalidationReason, InvalidationSignal, Table};
use crate::SyncError;

/// Connection state of a channel.
///
/// ```text
/// Disconnected ──open──▶ Connecting ──▶ Connected
///      ▲                   ▲  │ refused      │ transport error
///      │                   │  ▼              ▼
///      └─ close / give up ─ Reconnecting { attempt }
/// ```
///
/// Every handshake, the first and each retry after a backoff, runs in
/// `Connecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting before reconnection attempt `attempt` (1-based).
    Reconnecting { attempt: u32 },
}

impl ChannelState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ChannelState::Connected)
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelState::Disconnected => f.write_str("disconnected"),
            ChannelState::Connecting => f.write_str("connecting"),
            ChannelState::Connected => f.write_str("connected"),
            ChannelState::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
        }
    }
}

/// Owner of an open channel.
///
/// [`close`](Self::close) releases the remote subscription and waits for
/// it; dropping the handle requests the same release without waiting.
pub struct ChannelHandle {
    table: Table,
    state: watch::Receiver<ChannelState>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("table", &self.table)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl ChannelHandle {
    pub fn table(&self) -> Table {
        self.table
    }

    /// Current state.
    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state.clone()
    }

    /// Wait until the state satisfies `predicate`.
    ///
    /// Returns the matching state, or `Disconnected` if the channel task
    /// ended without ever reaching it.
    pub async fn wait_until(&self, predicate: impl FnMut(&ChannelState) -> bool) -> ChannelState {
        let mut state = self.state.clone();
        let reached = state.wait_for(predicate).await.map(|s| *s);
        reached.unwrap_or(ChannelState::Disconnected)
    }

    /// Tear the channel down and wait until the remote subscription is
    /// released.
    pub async fn close(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            // The task may already have ended on its own.
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(table = %self.table, error = %e, "realtime channel task failed");
            }
        }
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

/// Why the event pump stopped.
enum Exit {
    Shutdown,
    Disconnected(SyncError),
}

struct Channel {
    service: Arc<dyn RealtimeService>,
    executor: QueryExecutor,
    config: RealtimeConfig,
    table: Table,
    state: watch::Sender<ChannelState>,
}

/// Spawn the task for `table` and return its handle.
pub(super) fn spawn(
    service: Arc<dyn RealtimeService>,
    executor: QueryExecutor,
    config: RealtimeConfig,
    table: Table,
) -> ChannelHandle {
    let (state_tx, state_rx) = watch::channel(ChannelState::Connecting);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let channel = Channel {
        service,
        executor,
        config,
        table,
        state: state_tx,
    };
    let task = tokio::spawn(channel.run(shutdown_rx));
    ChannelHandle {
        table,
        state: state_rx,
        shutdown: Some(shutdown_tx),
        task: Some(task),
    }
}

impl Channel {
    async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        let table = self.table;
        // Consecutive failed connections; reset once connected.
        let mut failures: u32 = 0;
        loop {
            let subscribed = tokio::select! {
                _ = &mut shutdown => break,
                result = self.service.subscribe(table) => result,
            };
            match subscribed {
                Ok(mut feed) => {
                    failures = 0;
                    self.state.send_replace(ChannelState::Connected);
                    info!(%table, feed = %feed.id, "realtime channel connected");
                    let exit = self.pump(&mut feed.events, &mut shutdown).await;
                    self.release(feed.id).await;
                    match exit {
                        Exit::Shutdown => break,
                        Exit::Disconnected(e) => {
                            warn!(%table, error = %e, "realtime channel disconnected");
                        }
                    }
                }
                Err(e) if e.is_terminal() => {
                    warn!(%table, error = %e, "realtime subscription refused");
                    break;
                }
                Err(e) => {
                    warn!(%table, error = %e, "realtime subscription failed");
                }
            }

            failures += 1;
            if failures >= self.config.reconnect.max_attempts {
                warn!(%table, attempts = failures, "giving up on realtime channel");
                break;
            }
            metrics::counter!(telemetry::REALTIME_RECONNECTS_TOTAL, "table" => table.as_str())
                .increment(1);
            self.state
                .send_replace(ChannelState::Reconnecting { attempt: failures });
            let delay = self.config.reconnect.delay_for_attempt(failures - 1);
            debug!(%table, attempt = failures, delay_ms = delay.as_millis() as u64, "reconnecting");
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(delay) => {}
            }
            self.state.send_replace(ChannelState::Connecting);
        }
        self.state.send_replace(ChannelState::Disconnected);
        debug!(%table, "realtime channel closed");
    }

    /// Forward change events as invalidations until shutdown or disconnect.
    async fn pump(&self, events: &mut ChangeStream, shutdown: &mut oneshot::Receiver<()>) -> Exit {
        loop {
            let next = tokio::select! {
                _ = &mut *shutdown => return Exit::Shutdown,
                next = events.next() => next,
            };
            let event = match next {
                Some(Ok(event)) => event,
                Some(Err(e)) => return Exit::Disconnected(e),
                None => {
                    return Exit::Disconnected(SyncError::ChannelDisconnected(format!(
                        "{} feed closed",
                        self.table
                    )));
                }
            };
            if event.table != self.table {
                trace!(expected = %self.table, got = %event.table, "ignoring event for another table");
                continue;
            }
            metrics::counter!(telemetry::REALTIME_EVENTS_TOTAL,
                "table" => event.table.as_str(),
                "operation" => event.operation.as_str(),
            )
            .increment(1);
            debug!(table = %event.table, operation = %event.operation, "change event");

            let signal = InvalidationSignal::new(
                event.table,
                InvalidationReason::Realtime(event.operation),
            );
            tokio::select! {
                _ = &mut *shutdown => return Exit::Shutdown,
                _ = self.executor.invalidate(signal) => {}
            }
        }
    }

    async fn release(&self, id: FeedId) {
        if let Err(e) = self.service.unsubscribe(id).await {
            warn!(table = %self.table, feed = %id, error = %e, "failed to release change feed");
        }
    }
}
