//! Listsync - list replication engine
//!
//! This crate keeps a local SQLite copy of remote SharePoint lists in sync:
//! - Domain models (lists, items, subscriptions, notifications)
//! - Record set diffing for full and incremental fetches
//! - Microsoft Graph client and app-only authentication
//! - Storage trait with SQLite and in-memory backends
//! - Per-list reconciliation, subscription reconciliation and triggers
//!
//! The engine is synchronous; the webhook binary runs passes on the tokio
//! blocking pool through [`Dispatcher`].

pub mod config;
pub mod diff;
pub mod error;
pub mod models;
pub mod source;
pub mod storage;
pub mod sync;

pub use config::{GraphSettings, SyncConfig};
pub use diff::{DiffResult, diff_delta, diff_full};
pub use error::{Result, SyncError};
pub use models::{
    ChangeNotification, ColumnMapping, ItemRecord, LifecycleNotification, ListRecord,
    ResourceDescriptor, ResourceRef, ResourceSchema, SubscriptionRecord, TrackedResource,
};
pub use source::{GraphClient, InMemorySource, ItemPage, RemoteSource};
pub use storage::{InMemoryListStore, ListStore, SqliteListStore};
pub use sync::{
    ChangeOutcome, ChangeTrigger, DispatchOutcome, Dispatcher, LifecycleTrigger, ListReconciler,
    StartupSummary, SubscriptionReconciler, SyncMode, SyncStats, run_startup,
};
