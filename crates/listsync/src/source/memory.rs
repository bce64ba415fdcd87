//! In-memory remote source
//!
//! This implementation is used for testing. It keeps a change log per list
//! so it can serve both full enumerations and delta fetches, issues opaque
//! `delta:{version}` tokens, and can be told to expire tokens or fail the
//! next fetch.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::{ItemPage, RemoteSource};
use crate::error::{Result, SyncError};
use crate::models::{ItemRecord, ListRecord, ResourceDescriptor, ResourceRef, SubscriptionRecord};

#[derive(Default)]
struct ListState {
    metadata: Option<ListRecord>,
    live: BTreeMap<String, ItemRecord>,
    /// (version, change) in the order they happened; tombstones have an empty revision
    changes: Vec<(u64, ItemRecord)>,
}

#[derive(Default)]
struct SourceState {
    version: u64,
    /// Delta tokens issued before this version are rejected
    min_valid_version: u64,
    lists: HashMap<ResourceRef, ListState>,
    subscriptions: Vec<SubscriptionRecord>,
    next_subscription: u64,
    fetch_log: Vec<(ResourceRef, Option<String>)>,
    injected_failures: VecDeque<SyncError>,
    created: usize,
    deleted: usize,
    renewed: usize,
}

/// In-memory implementation of [`RemoteSource`]
pub struct InMemorySource {
    state: Mutex<SourceState>,
    page_size: usize,
    fetch_delay: Mutex<Option<Duration>>,
}

impl InMemorySource {
    /// Create an empty source serving pages of 100 items
    pub fn new() -> Self {
        Self::with_page_size(100)
    }

    /// Create an empty source with a custom page size
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            state: Mutex::new(SourceState::default()),
            page_size: page_size.max(1),
            fetch_delay: Mutex::new(None),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, SourceState>> {
        self.state
            .lock()
            .map_err(|_| SyncError::source_fetch("source state lock poisoned"))
    }

    /// Create or replace a list's metadata
    pub fn put_list(&self, resource: &ResourceRef, revision: &str, name: &str, display_name: &str) {
        if let Ok(mut state) = self.lock() {
            state.lists.entry(resource.clone()).or_default().metadata =
                Some(ListRecord::new(resource, revision, name, display_name));
        }
    }

    /// Create or replace an item, recording the change
    pub fn put_item(&self, item: ItemRecord) {
        let resource = ResourceRef::new(&item.site_id, &item.list_id);
        if let Ok(mut state) = self.lock() {
            state.version += 1;
            let version = state.version;
            let list = state.lists.entry(resource).or_default();
            list.live.insert(item.id.clone(), item.clone());
            list.changes.push((version, item));
        }
    }

    /// Remove an item, recording a tombstone
    pub fn remove_item(&self, resource: &ResourceRef, id: &str) {
        if let Ok(mut state) = self.lock() {
            state.version += 1;
            let version = state.version;
            let list = state.lists.entry(resource.clone()).or_default();
            list.live.remove(id);
            list.changes.push((version, ItemRecord::new(resource, id, "")));
        }
    }

    /// Invalidate every delta token issued so far
    pub fn expire_tokens(&self) {
        if let Ok(mut state) = self.lock() {
            state.min_valid_version = state.version + 1;
        }
    }

    /// Make the next `fetch_items` call fail with `error`
    pub fn fail_next_fetch(&self, error: SyncError) {
        if let Ok(mut state) = self.lock() {
            state.injected_failures.push_back(error);
        }
    }

    /// Sleep this long inside every `fetch_items` call
    pub fn set_fetch_delay(&self, delay: Option<Duration>) {
        if let Ok(mut guard) = self.fetch_delay.lock() {
            *guard = delay;
        }
    }

    /// Seed a subscription as if it had been created earlier
    pub fn insert_subscription(&self, subscription: SubscriptionRecord) {
        if let Ok(mut state) = self.lock() {
            state.subscriptions.push(subscription);
        }
    }

    /// Current subscriptions
    pub fn subscriptions(&self) -> Vec<SubscriptionRecord> {
        self.lock().map(|s| s.subscriptions.clone()).unwrap_or_default()
    }

    /// Every `fetch_items` call so far as (resource, cursor)
    pub fn fetch_log(&self) -> Vec<(ResourceRef, Option<String>)> {
        self.lock().map(|s| s.fetch_log.clone()).unwrap_or_default()
    }

    /// (created, deleted, renewed) subscription call counts
    pub fn subscription_calls(&self) -> (usize, usize, usize) {
        self.lock()
            .map(|s| (s.created, s.deleted, s.renewed))
            .unwrap_or_default()
    }

    fn page(
        &self,
        records: Vec<ItemRecord>,
        kind: &str,
        since: u64,
        offset: usize,
        version: u64,
    ) -> ItemPage {
        let end = (offset + self.page_size).min(records.len());
        let items = records.get(offset..end).map(|s| s.to_vec()).unwrap_or_default();

        if end < records.len() {
            ItemPage {
                items,
                next_link: Some(format!("next:{}:{}:{}", kind, since, end)),
                delta_token: None,
            }
        } else {
            ItemPage {
                items,
                next_link: None,
                delta_token: Some(format!("delta:{}", version)),
            }
        }
    }
}

impl Default for InMemorySource {
    fn default() -> Self {
        Self::new()
    }
}

/// Parsed form of the cursors this source hands out
enum Cursor {
    Start,
    Delta { since: u64 },
    Next { full: bool, since: u64, offset: usize },
}

fn parse_cursor(cursor: Option<&str>) -> Result<Cursor> {
    let Some(cursor) = cursor else {
        return Ok(Cursor::Start);
    };
    let parts: Vec<&str> = cursor.split(':').collect();
    let number = |s: &str| s.parse::<u64>().map_err(|_| SyncError::TokenInvalid);
    match parts.as_slice() {
        ["delta", since] => Ok(Cursor::Delta {
            since: number(*since)?,
        }),
        ["next", kind, since, offset] => Ok(Cursor::Next {
            full: *kind == "full",
            since: number(*since)?,
            offset: number(*offset)? as usize,
        }),
        _ => Err(SyncError::TokenInvalid),
    }
}

impl RemoteSource for InMemorySource {
    fn get_list_metadata(&self, resource: &ResourceRef) -> Result<ListRecord> {
        let state = self.lock()?;
        state
            .lists
            .get(resource)
            .and_then(|l| l.metadata.clone())
            .ok_or_else(|| SyncError::source_fetch(format!("list {} not found", resource)))
    }

    fn fetch_items(
        &self,
        resource: &ResourceRef,
        cursor: Option<&str>,
        _fields: &[String],
    ) -> Result<ItemPage> {
        let delay = self.fetch_delay.lock().ok().and_then(|d| *d);
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let mut state = self.lock()?;
        state
            .fetch_log
            .push((resource.clone(), cursor.map(str::to_string)));

        if let Some(error) = state.injected_failures.pop_front() {
            return Err(error);
        }

        let version = state.version;
        let min_valid = state.min_valid_version;
        let list = state.lists.get(resource);

        let changes_since = |since: u64| -> Vec<ItemRecord> {
            list.map(|l| {
                l.changes
                    .iter()
                    .filter(|(v, _)| *v > since)
                    .map(|(_, item)| item.clone())
                    .collect()
            })
            .unwrap_or_default()
        };
        let snapshot = || -> Vec<ItemRecord> {
            list.map(|l| l.live.values().cloned().collect())
                .unwrap_or_default()
        };

        match parse_cursor(cursor)? {
            Cursor::Start => Ok(self.page(snapshot(), "full", version, 0, version)),
            Cursor::Delta { since } => {
                if since < min_valid {
                    return Err(SyncError::TokenInvalid);
                }
                Ok(self.page(changes_since(since), "delta", since, 0, version))
            }
            Cursor::Next {
                full: true,
                offset,
                ..
            } => Ok(self.page(snapshot(), "full", version, offset, version)),
            Cursor::Next {
                full: false,
                since,
                offset,
            } => Ok(self.page(changes_since(since), "delta", since, offset, version)),
        }
    }

    fn list_subscriptions(&self) -> Result<Vec<SubscriptionRecord>> {
        Ok(self.lock()?.subscriptions.clone())
    }

    fn create_subscription(
        &self,
        resource: &ResourceDescriptor,
        notification_url: &str,
        lifecycle_url: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<SubscriptionRecord> {
        let mut state = self.lock()?;
        state.next_subscription += 1;
        state.created += 1;
        let record = SubscriptionRecord {
            id: format!("sub-{}", state.next_subscription),
            resource: resource.clone(),
            notification_url: notification_url.to_string(),
            lifecycle_url: lifecycle_url.to_string(),
            expires_at,
        };
        state.subscriptions.push(record.clone());
        Ok(record)
    }

    fn renew_subscription(&self, id: &str, expires_at: DateTime<Utc>) -> Result<SubscriptionRecord> {
        let mut state = self.lock()?;
        state.renewed += 1;
        let subscription = state
            .subscriptions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| SyncError::source_fetch(format!("subscription {} not found", id)))?;
        subscription.expires_at = expires_at;
        Ok(subscription.clone())
    }

    fn delete_subscription(&self, id: &str) -> Result<()> {
        let mut state = self.lock()?;
        state.deleted += 1;
        state.subscriptions.retain(|s| s.id != id);
        Ok(())
    }
}
