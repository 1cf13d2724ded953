//! Capability traits of the hosted backend.
//!
//! The backend is split by capability rather than one "god trait", like the
//! service itself exposes them: table reads and writes ([`DataService`]),
//! the role lookup ([`RoleProvider`]) and the change feed
//! ([`RealtimeService`]). A deployment without realtime simply provides no
//! `RealtimeService`.
//!
//! # Authorization
//!
//! Row-level security runs server-side. Implementations report a refused
//! write as [`SyncError::PermissionDenied`](crate::SyncError::PermissionDenied)
//! and a constraint failure as [`SyncError::Validation`](crate::SyncError::Validation);
//! callers never duplicate those checks.

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde_json::Value;

use crate::Result;
use crate::types::{ChangeEvent, Filter, Role, Row, RowId, Select, Table};

// ============================================================================
// Data Service
// ============================================================================

/// Table reads and writes.
#[async_trait]
pub trait DataService: Send + Sync {
    /// Backend name for logging/debugging.
    fn name(&self) -> &str;

    /// Rows of `table` matching `query`.
    async fn select(&self, table: Table, query: &Select) -> Result<Vec<Row>>;

    /// Exact number of rows matching all filters.
    async fn count(&self, table: Table, filters: &[Filter]) -> Result<u64>;

    /// Insert one row, returning its generated id.
    async fn insert(&self, table: Table, row: Value) -> Result<RowId>;

    /// Apply a partial update to one row.
    async fn update(&self, table: Table, id: &RowId, patch: Value) -> Result<()>;

    /// Delete one row.
    async fn delete(&self, table: Table, id: &RowId) -> Result<()>;
}

// ============================================================================
// Role Provider
// ============================================================================

/// Role lookup for the signed-in user.
#[async_trait]
pub trait RoleProvider: Send + Sync {
    async fn current_user_role(&self) -> Result<Role>;
}

// ============================================================================
// Realtime Service
// ============================================================================

/// Identifier of one remote change-feed subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeedId(pub u64);

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "feed-{}", self.0)
    }
}

/// Stream of change events for one table.
///
/// The stream yields `Err(ChannelDisconnected)` or ends when the transport
/// drops; the subscription must still be released with
/// [`RealtimeService::unsubscribe`].
pub type ChangeStream = Pin<Box<dyn Stream<Item = Result<ChangeEvent>> + Send>>;

/// An open change feed.
pub struct ChangeFeed {
    pub id: FeedId,
    pub events: ChangeStream,
}

impl fmt::Debug for ChangeFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeFeed").field("id", &self.id).finish()
    }
}

/// Push-based change notifications keyed by table.
#[async_trait]
pub trait RealtimeService: Send + Sync {
    /// Open a change feed for `table`. Completes once the handshake is done.
    async fn subscribe(&self, table: Table) -> Result<ChangeFeed>;

    /// Release a feed. Releasing an unknown or already released feed is a
    /// no-op.
    async fn unsubscribe(&self, id: FeedId) -> Result<()>;
}
