//! Remote source gateway
//!
//! This module provides:
//! - The [`RemoteSource`] trait consumed by the reconcilers
//! - A Microsoft Graph implementation over blocking HTTP
//! - An in-memory implementation for tests

mod auth;
mod graph;
mod memory;

pub use auth::GraphAuth;
pub use graph::GraphClient;
pub use memory::InMemorySource;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{ItemRecord, ListRecord, ResourceDescriptor, ResourceRef, SubscriptionRecord};

/// One page of an item fetch
#[derive(Debug, Clone, Default)]
pub struct ItemPage {
    pub items: Vec<ItemRecord>,
    /// Cursor for the next page of the same fetch
    pub next_link: Option<String>,
    /// Delta cursor for the next incremental fetch; ends pagination
    pub delta_token: Option<String>,
}

/// Operations the reconcilers need from the remote source
///
/// Implementations must be safe to share across worker threads.
pub trait RemoteSource: Send + Sync {
    /// Fetch metadata for one list
    fn get_list_metadata(&self, resource: &ResourceRef) -> Result<ListRecord>;

    /// Fetch one page of items
    ///
    /// `cursor` is either a delta token from a previous pass or a next-page
    /// link from the previous page; `None` starts a full enumeration.
    /// Returns [`crate::SyncError::TokenInvalid`] when the source no longer
    /// honors the cursor.
    fn fetch_items(
        &self,
        resource: &ResourceRef,
        cursor: Option<&str>,
        fields: &[String],
    ) -> Result<ItemPage>;

    /// List all subscriptions owned by this application
    fn list_subscriptions(&self) -> Result<Vec<SubscriptionRecord>>;

    /// Register a new change-notification subscription
    fn create_subscription(
        &self,
        resource: &ResourceDescriptor,
        notification_url: &str,
        lifecycle_url: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<SubscriptionRecord>;

    /// Extend a subscription's expiry
    fn renew_subscription(&self, id: &str, expires_at: DateTime<Utc>) -> Result<SubscriptionRecord>;

    /// Remove a subscription
    fn delete_subscription(&self, id: &str) -> Result<()>;
}
