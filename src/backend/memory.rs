//! In-process backend.
//!
//! [`MemoryBackend`] keeps every table in memory and implements all three
//! backend traits. It behaves like the hosted service where the sync layer
//! can observe it:
//!
//! - writes are checked against the current [`Role`] (viewers cannot
//!   write, staff cannot delete or change the configuration) and fail with
//!   [`SyncError::PermissionDenied`];
//! - required columns are enforced and fail with [`SyncError::Validation`];
//! - every successful write publishes a [`ChangeEvent`] on the table's
//!   change feed.
//!
//! It is what the integration tests and local demos run against.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, trace};

use super::{ChangeFeed, DataService, FeedId, RealtimeService, RoleProvider};
use crate::types::{ChangeEvent, ChangeOperation, Filter, Role, Row, RowId, Select, Table};
use crate::{FieldError, Result, SyncError};

/// Buffered change events per table before slow feeds start lagging.
const FEED_CAPACITY: usize = 256;

#[derive(Default)]
struct Tables {
    rows: HashMap<Table, Vec<Row>>,
    next_id: u64,
}

/// In-memory implementation of the backend traits.
pub struct MemoryBackend {
    tables: RwLock<Tables>,
    role: RwLock<Role>,
    role_lookup_fails: AtomicBool,
    realtime_available: AtomicBool,
    channels: Mutex<HashMap<Table, broadcast::Sender<ChangeEvent>>>,
    feeds: Mutex<HashMap<FeedId, Table>>,
    next_feed: AtomicU64,
    selects: AtomicU64,
    latency: Duration,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Empty backend whose user is an admin.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            role: RwLock::new(Role::Admin),
            role_lookup_fails: AtomicBool::new(false),
            realtime_available: AtomicBool::new(true),
            channels: Mutex::new(HashMap::new()),
            feeds: Mutex::new(HashMap::new()),
            next_feed: AtomicU64::new(1),
            selects: AtomicU64::new(0),
            latency: Duration::ZERO,
        }
    }

    /// Delay every read and realtime handshake by `latency` (uses tokio
    /// time, so paused clocks apply).
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Set the role of the signed-in user.
    pub fn with_role(self, role: Role) -> Self {
        self.set_role(role);
        self
    }

    pub fn set_role(&self, role: Role) {
        match self.role.write() {
            Ok(mut current) => *current = role,
            Err(poisoned) => *poisoned.into_inner() = role,
        }
    }

    /// Make `current_user_role` fail with a transport error.
    pub fn set_role_lookup_fails(&self, fails: bool) {
        self.role_lookup_fails.store(fails, Ordering::SeqCst);
    }

    /// Refuse new change-feed subscriptions while `false`.
    pub fn set_realtime_available(&self, available: bool) {
        self.realtime_available.store(available, Ordering::SeqCst);
    }

    /// Insert rows directly, bypassing role checks and change events.
    ///
    /// Rows without an `id` get a generated one.
    pub fn seed(&self, table: Table, rows: impl IntoIterator<Item = Value>) -> Result<()> {
        let mut tables = self.write_tables()?;
        for value in rows {
            let row = into_row(value)?;
            let row = with_generated_fields(&mut tables, table, row);
            tables.rows.entry(table).or_default().push(row);
        }
        Ok(())
    }

    /// Snapshot of a table's rows.
    pub fn rows(&self, table: Table) -> Result<Vec<Row>> {
        Ok(self
            .read_tables()?
            .rows
            .get(&table)
            .cloned()
            .unwrap_or_default())
    }

    /// Number of `select` calls served so far.
    pub fn select_calls(&self) -> u64 {
        self.selects.load(Ordering::SeqCst)
    }

    /// Change feeds currently open.
    pub fn active_feeds(&self) -> usize {
        self.feeds.lock().map_or(0, |feeds| feeds.len())
    }

    /// Simulate a transport drop: every open change stream ends.
    ///
    /// The subscriptions stay registered until they are unsubscribed, as a
    /// server would keep them until the client tears them down.
    pub fn drop_realtime_connections(&self) {
        if let Ok(mut channels) = self.channels.lock() {
            debug!(channels = channels.len(), "dropping realtime connections");
            channels.clear();
        }
    }

    /// Publish a change event as if another client had written.
    pub fn publish(&self, event: ChangeEvent) {
        let Ok(channels) = self.channels.lock() else {
            return;
        };
        if let Some(sender) = channels.get(&event.table) {
            // No receiver is fine: nobody is listening to this table.
            let _ = sender.send(event);
        }
    }

    fn read_tables(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>> {
        self.tables.read().map_err(|e| {
            SyncError::Configuration(format!("Failed to acquire read lock: {}", e))
        })
    }

    fn write_tables(&self) -> Result<std::sync::RwLockWriteGuard<'_, Tables>> {
        self.tables.write().map_err(|e| {
            SyncError::Configuration(format!("Failed to acquire write lock: {}", e))
        })
    }

    fn current_role(&self) -> Role {
        match self.role.read() {
            Ok(role) => *role,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn authorize(&self, table: Table, operation: ChangeOperation) -> Result<()> {
        let permissions = self.current_role().permissions();
        let allowed = match (table, operation) {
            (Table::Configuration, _) | (_, ChangeOperation::Delete) => permissions.can_delete,
            _ => permissions.can_edit,
        };
        if allowed {
            Ok(())
        } else {
            Err(SyncError::PermissionDenied(format!(
                "new row violates row-level security policy for table \"{table}\""
            )))
        }
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

fn into_row(value: Value) -> Result<Row> {
    match value {
        Value::Object(row) => Ok(row),
        other => Err(SyncError::validation(format!(
            "expected a JSON object, got {other}"
        ))),
    }
}

fn with_generated_fields(tables: &mut Tables, table: Table, mut row: Row) -> Row {
    if !row.get("id").is_some_and(Value::is_string) {
        tables.next_id += 1;
        row.insert(
            "id".to_string(),
            Value::String(format!("{}-{}", table, tables.next_id)),
        );
    }
    row.entry("created_at".to_string())
        .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));
    row
}

/// Columns that must be present and non-empty.
fn required_columns(table: Table) -> &'static [&'static str] {
    match table {
        Table::Leads => &["nom"],
        Table::Devis => &["numero", "client_nom"],
        Table::Chantiers => &["nom_client"],
        Table::Configuration => &["nom_entreprise"],
        Table::Profiles | Table::UserRoles => &[],
    }
}

/// Check required columns; with `partial`, only columns present in `row`.
fn validate(table: Table, row: &Row, partial: bool) -> Result<()> {
    let fields: Vec<FieldError> = required_columns(table)
        .iter()
        .filter(|column| !partial || row.contains_key(**column))
        .filter(|column| {
            !row.get(**column)
                .and_then(Value::as_str)
                .is_some_and(|s| !s.trim().is_empty())
        })
        .map(|column| FieldError::new(*column, "is required"))
        .collect();
    if fields.is_empty() {
        return Ok(());
    }
    Err(SyncError::Validation {
        message: format!(
            "null value in column \"{}\" of relation \"{table}\" violates not-null constraint",
            fields[0].field
        ),
        fields,
    })
}

fn embed_related(tables: &Tables, select: &Select, mut row: Row) -> Row {
    for embed in &select.embeds {
        let related = row
            .get(&embed.foreign_key)
            .and_then(Value::as_str)
            .and_then(|id| {
                tables.rows.get(&embed.table)?.iter().find(|candidate| {
                    candidate.get("id").and_then(Value::as_str) == Some(id)
                })
            })
            .map_or(Value::Null, |r| Value::Object(r.clone()));
        row.insert(embed.table.as_str().to_string(), related);
    }
    row
}

fn find_index(rows: &[Row], id: &RowId) -> Option<usize> {
    rows.iter()
        .position(|row| row.get("id").and_then(Value::as_str) == Some(id.as_str()))
}

#[async_trait]
impl DataService for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn select(&self, table: Table, query: &Select) -> Result<Vec<Row>> {
        self.selects.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        let tables = self.read_tables()?;
        let mut rows: Vec<Row> = tables
            .rows
            .get(&table)
            .map(|rows| rows.iter().filter(|r| query.matches(r)).cloned().collect())
            .unwrap_or_default();
        if let Some(order) = &query.order {
            rows.sort_by(|a, b| order.compare(a, b));
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        let rows = rows
            .into_iter()
            .map(|row| query.project(&embed_related(&tables, query, row)))
            .collect();
        trace!(%table, "memory select");
        Ok(rows)
    }

    async fn count(&self, table: Table, filters: &[Filter]) -> Result<u64> {
        self.simulate_latency().await;
        let tables = self.read_tables()?;
        let count = tables.rows.get(&table).map_or(0, |rows| {
            rows.iter()
                .filter(|row| filters.iter().all(|f| f.matches(row)))
                .count()
        });
        Ok(count as u64)
    }

    async fn insert(&self, table: Table, row: Value) -> Result<RowId> {
        self.authorize(table, ChangeOperation::Insert)?;
        let row = into_row(row)?;
        validate(table, &row, false)?;
        let id = {
            let mut tables = self.write_tables()?;
            let row = with_generated_fields(&mut tables, table, row);
            let id = row
                .get("id")
                .and_then(Value::as_str)
                .map(RowId::new)
                .unwrap_or_else(|| RowId::new(""));
            tables.rows.entry(table).or_default().push(row);
            id
        };
        self.publish(ChangeEvent::new(table, ChangeOperation::Insert));
        Ok(id)
    }

    async fn update(&self, table: Table, id: &RowId, patch: Value) -> Result<()> {
        self.authorize(table, ChangeOperation::Update)?;
        let patch = into_row(patch)?;
        validate(table, &patch, true)?;
        {
            let mut tables = self.write_tables()?;
            let rows = tables.rows.entry(table).or_default();
            let index = find_index(rows, id).ok_or_else(|| SyncError::NotFound {
                table: table.to_string(),
                id: id.to_string(),
            })?;
            for (column, value) in patch {
                if column != "id" {
                    rows[index].insert(column, value);
                }
            }
        }
        self.publish(ChangeEvent::new(table, ChangeOperation::Update));
        Ok(())
    }

    async fn delete(&self, table: Table, id: &RowId) -> Result<()> {
        self.authorize(table, ChangeOperation::Delete)?;
        {
            let mut tables = self.write_tables()?;
            let rows = tables.rows.entry(table).or_default();
            let index = find_index(rows, id).ok_or_else(|| SyncError::NotFound {
                table: table.to_string(),
                id: id.to_string(),
            })?;
            rows.remove(index);
        }
        self.publish(ChangeEvent::new(table, ChangeOperation::Delete));
        Ok(())
    }
}

#[async_trait]
impl RoleProvider for MemoryBackend {
    async fn current_user_role(&self) -> Result<Role> {
        if self.role_lookup_fails.load(Ordering::SeqCst) {
            return Err(SyncError::Http("role lookup unavailable".to_string()));
        }
        Ok(self.current_role())
    }
}

#[async_trait]
impl RealtimeService for MemoryBackend {
    async fn subscribe(&self, table: Table) -> Result<ChangeFeed> {
        self.simulate_latency().await;
        if !self.realtime_available.load(Ordering::SeqCst) {
            return Err(SyncError::ChannelDisconnected(format!(
                "realtime:{table} handshake refused"
            )));
        }
        let receiver = {
            let mut channels = self.channels.lock().map_err(|e| {
                SyncError::Configuration(format!("Failed to acquire lock: {}", e))
            })?;
            channels
                .entry(table)
                .or_insert_with(|| broadcast::channel(FEED_CAPACITY).0)
                .subscribe()
        };
        let id = FeedId(self.next_feed.fetch_add(1, Ordering::SeqCst));
        self.feeds
            .lock()
            .map_err(|e| SyncError::Configuration(format!("Failed to acquire lock: {}", e)))?
            .insert(id, table);
        debug!(%table, feed = %id, "change feed opened");

        // A lagging receiver missed events; report one generic update so the
        // table is still invalidated.
        let events = BroadcastStream::new(receiver).map(move |item| match item {
            Ok(event) => Ok(event),
            Err(BroadcastStreamRecvError::Lagged(_)) => {
                Ok(ChangeEvent::new(table, ChangeOperation::Update))
            }
        });
        Ok(ChangeFeed {
            id,
            events: Box::pin(events),
        })
    }

    async fn unsubscribe(&self, id: FeedId) -> Result<()> {
        let removed = self
            .feeds
            .lock()
            .map_err(|e| SyncError::Configuration(format!("Failed to acquire lock: {}", e)))?
            .remove(&id);
        if let Some(table) = removed {
            debug!(%table, feed = %id, "change feed released");
        }
        Ok(())
    }
}
