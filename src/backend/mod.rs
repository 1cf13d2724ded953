//! Backend implementations.
//!
//! The sync layer only ever talks to the traits in [`traits`]. Two
//! implementations ship with the crate:
//!
//! - [`MemoryBackend`]: in-process tables with role enforcement and a
//!   change feed, used by tests and demos.
//! - [`RestBackend`]: PostgREST over HTTP (feature `rest`).

mod memory;
#[cfg(feature = "rest")]
mod rest;
pub mod traits;

pub use memory::MemoryBackend;
#[cfg(feature = "rest")]
pub use rest::RestBackend;
pub use traits::{ChangeFeed, ChangeStream, DataService, FeedId, RealtimeService, RoleProvider};
