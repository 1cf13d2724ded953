//! Tuile - client-side data synchronization for the roofing back office
//!
//! The screens of the back office (dashboard, chantier list, settings)
//! read through a shared cache and write through a coordinator that
//! invalidates what the write made stale. Server-pushed change events
//! invalidate the same way, so an open screen follows edits made
//! elsewhere.
//!
//! - [`CacheStore`] keeps one [`CacheEntry`] per query [`Fingerprint`],
//!   with the subscribers observing it.
//! - [`QueryExecutor`] serves reads from the cache, joins identical
//!   in-flight fetches and retries transient failures.
//! - [`MutationCoordinator`] runs writes and invalidates the affected
//!   [`Scope`]s once they succeed.
//! - [`RealtimeBridge`] turns change events into invalidations and
//!   reconnects with backoff.
//!
//! # Example
//!
//! ```rust,no_run
//! use tuile::{RestBackend, Table, Tuile};
//!
//! #[tokio::main]
//! async fn main() -> tuile::Result<()> {
//!     let backend = RestBackend::new("https://project.example.co", "anon-key")?
//!         .with_access_token("user-jwt")
//!         .with_user_id("5b1c0c3e");
//!
//!     let client = Tuile::builder()
//!         .rest(backend)
//!         .user_id("5b1c0c3e")
//!         .build()?;
//!
//!     for chantier in client.chantiers(Some("toiture")).await? {
//!         println!("{} ({})", chantier.nom_client, chantier.statut);
//!     }
//!
//!     let kpis = client.kpis().await?;
//!     println!("{} leads, {:.2} EUR", kpis.leads, kpis.revenue);
//!     Ok(())
//! }
//! ```
//!
//! # In-memory backend
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tuile::{MemoryBackend, Table, Tuile};
//!
//! # async fn example() -> tuile::Result<()> {
//! let backend = Arc::new(MemoryBackend::new());
//! let client = Tuile::builder().memory(Arc::clone(&backend)).build()?;
//!
//! // Keep the dashboard in sync with other sessions.
//! let _channel = client.realtime(Table::Leads)?;
//! let by_status = client.leads_by_status().await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod mutation;
pub mod query;
pub mod realtime;
pub mod retry;
pub mod telemetry;
pub mod types;
pub mod views;

/// Crate version, as shown by `tuile --version`.
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

// Re-export main types at crate root
pub use backend::{DataService, MemoryBackend, RealtimeService, RoleProvider};
#[cfg(feature = "rest")]
pub use backend::RestBackend;
pub use cache::{
    CacheConfig, CacheEntry, CacheStore, QueryStatus, RetentionClass, RetentionPolicy,
    Subscription,
};
pub use client::{SyncClient, SyncClientBuilder, Tuile};
pub use config::{Secrets, TuileConfig};
pub use error::{FieldError, Result, SyncError};
pub use mutation::MutationCoordinator;
pub use query::{InvalidationReport, QueryExecutor, QueryKey};
pub use realtime::{ChannelHandle, ChannelState, RealtimeBridge, RealtimeConfig};
pub use retry::RetryConfig;
pub use views::{ClientRevenue, DEFAULT_TOP_CLIENTS, Kpis, MonthlyRevenue, ViewQuery};

// Re-export all types
pub use types::{
    ChangeEvent, ChangeOperation, Chantier, ChantierInput, ChantierStatus, Configuration,
    ConfigurationPatch, Devis, DevisOption, Embed, Filter, Fingerprint, InvalidationReason,
    InvalidationSignal, Lead, LeadOption, Order, Permissions, Role, Row, RowId, Scope, Select,
    Table, devis_status, lead_status,
};
