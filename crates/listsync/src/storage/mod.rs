//! Storage traits and implementations
//!
//! This module defines the local store for replicated lists. The trait
//! allows swapping between the SQLite store used in production and the
//! in-memory store used by tests.

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemoryListStore;
pub use sqlite::SqliteListStore;
pub use traits::ListStore;
