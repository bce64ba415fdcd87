//! Per-list reconciliation
//!
//! One pass syncs the list's metadata (always a full comparison) and then
//! its items, fully or incrementally depending on the stored token. Any
//! failure clears the token so the next pass starts from a full snapshot.

use std::sync::Arc;
use std::time::Instant;

use super::delta::{DeltaState, SyncMode};
use crate::diff::{DiffResult, diff_delta, diff_full};
use crate::error::{Result, SyncError};
use crate::models::{ItemRecord, ListRecord, ResourceRef, TrackedResource};
use crate::source::RemoteSource;
use crate::storage::ListStore;

/// Statistics from one reconciliation pass
#[derive(Debug, Clone)]
pub struct SyncStats {
    /// How items were fetched (after any fallback)
    pub mode: SyncMode,
    /// Whether the list metadata row was written or removed
    pub metadata_changed: bool,
    /// Number of item pages requested from the source
    pub pages_fetched: usize,
    /// Number of item records returned by the source
    pub items_fetched: usize,
    pub items_inserted: usize,
    pub items_updated: usize,
    pub items_deleted: usize,
    /// The stored token was rejected and the pass fell back to a full fetch
    pub token_rejected: bool,
    /// Pagination stopped at the page cap before the source was exhausted
    pub truncated: bool,
    /// Duration of the pass
    pub duration_ms: u64,
}

impl Default for SyncStats {
    fn default() -> Self {
        Self {
            mode: SyncMode::Full,
            metadata_changed: false,
            pages_fetched: 0,
            items_fetched: 0,
            items_inserted: 0,
            items_updated: 0,
            items_deleted: 0,
            token_rejected: false,
            truncated: false,
            duration_ms: 0,
        }
    }
}

/// Items gathered by one paginated fetch
struct Fetched {
    items: Vec<ItemRecord>,
    delta_token: Option<String>,
    truncated: bool,
}

/// Syncs one tracked list from the remote source into the local store
pub struct ListReconciler {
    source: Arc<dyn RemoteSource>,
    store: Arc<dyn ListStore>,
    page_cap: Option<usize>,
}

impl ListReconciler {
    pub fn new(source: Arc<dyn RemoteSource>, store: Arc<dyn ListStore>) -> Self {
        Self {
            source,
            store,
            page_cap: None,
        }
    }

    /// Stop paginating once `cap` items have been fetched in one pass
    pub fn with_page_cap(mut self, cap: Option<usize>) -> Self {
        self.page_cap = cap;
        self
    }

    /// Run one reconciliation pass for `tracked`
    ///
    /// On error the continuation token is cleared before the error is
    /// returned.
    pub fn reconcile(&self, tracked: &TrackedResource) -> Result<SyncStats> {
        let start = Instant::now();
        let resource = &tracked.resource;
        let state = DeltaState::new(self.store.as_ref());
        let mut stats = SyncStats::default();

        let outcome = self
            .sync_metadata(resource)
            .and_then(|changed| {
                stats.metadata_changed = changed;
                self.sync_items(tracked, &state, &mut stats)
            });

        stats.duration_ms = start.elapsed().as_millis() as u64;
        match outcome {
            Ok(()) => {
                log::info!(
                    "Synced {} ({}): {} inserted, {} updated, {} deleted from {} fetched in {}ms",
                    resource,
                    stats.mode,
                    stats.items_inserted,
                    stats.items_updated,
                    stats.items_deleted,
                    stats.items_fetched,
                    stats.duration_ms
                );
                Ok(stats)
            }
            Err(e) => {
                log::warn!("Sync of {} failed after {}ms: {}", resource, stats.duration_ms, e);
                Err(state.reset_after_failure(resource, e))
            }
        }
    }

    /// Compare local and remote list metadata and apply the difference
    fn sync_metadata(&self, resource: &ResourceRef) -> Result<bool> {
        let local: Vec<ListRecord> = self.store.get_list(resource)?.into_iter().collect();
        let remote = self.source.get_list_metadata(resource)?;

        let diff = diff_full(&local, vec![remote], |l| l.id.as_str(), |l| l.revision.as_str());
        if diff.is_empty() {
            return Ok(false);
        }

        let DiffResult {
            to_insert,
            to_update,
            to_delete,
        } = diff;
        let upserts: Vec<ListRecord> = to_insert.into_iter().chain(to_update).collect();
        if !upserts.is_empty() {
            self.store.upsert_lists(&upserts)?;
        }
        for id in &to_delete {
            self.store.delete_list(&ResourceRef::new(&resource.site_id, id))?;
        }

        log::debug!("Updated metadata for {}", resource);
        Ok(true)
    }

    fn sync_items(
        &self,
        tracked: &TrackedResource,
        state: &DeltaState<'_>,
        stats: &mut SyncStats,
    ) -> Result<()> {
        let resource = &tracked.resource;
        let schema = &tracked.schema;
        let fields = schema.field_selector();

        self.store.prepare_items(schema)?;
        let token = state.get_token(resource)?;
        stats.mode = SyncMode::for_token(token.as_deref());

        let fetched = match self.fetch_all(resource, token.as_deref(), &fields, stats) {
            Err(SyncError::TokenInvalid) if token.is_some() => {
                log::warn!(
                    "Continuation token for {} was rejected, falling back to a full sync",
                    resource
                );
                state.clear_token(resource)?;
                stats.token_rejected = true;
                stats.mode = SyncMode::Full;
                self.fetch_all(resource, None, &fields, stats)?
            }
            other => other?,
        };
        stats.items_fetched = fetched.items.len();
        stats.truncated = fetched.truncated;

        let existing = self.store.get_items(schema, resource)?;
        let mut diff = match stats.mode {
            SyncMode::Full => {
                let snapshot: Vec<ItemRecord> = fetched
                    .items
                    .into_iter()
                    .filter(|i| !i.is_tombstone())
                    .collect();
                diff_full(&existing, snapshot, item_id, item_revision)
            }
            SyncMode::Incremental => diff_delta(&existing, fetched.items, item_id, item_revision),
        };

        if fetched.truncated && stats.mode == SyncMode::Full && !diff.to_delete.is_empty() {
            log::warn!(
                "Fetch of {} stopped at the page cap; skipping {} deletions",
                resource,
                diff.to_delete.len()
            );
            diff.to_delete.clear();
        }

        if !diff.to_insert.is_empty() {
            self.store.upsert_items(schema, &diff.to_insert)?;
            stats.items_inserted = diff.to_insert.len();
        }
        for item in &diff.to_update {
            self.store.update_item(schema, item)?;
            stats.items_updated += 1;
        }
        for id in &diff.to_delete {
            self.store.delete_item(schema, id)?;
            stats.items_deleted += 1;
        }

        // Only once every change is in the store
        match fetched.delta_token {
            Some(token) => state.set_token(resource, &token)?,
            None => state.clear_token(resource)?,
        }
        Ok(())
    }

    /// Follow next-page links until the source hands out a delta token,
    /// runs out of pages, or the page cap is reached
    fn fetch_all(
        &self,
        resource: &ResourceRef,
        token: Option<&str>,
        fields: &[String],
        stats: &mut SyncStats,
    ) -> Result<Fetched> {
        let mut items = Vec::new();
        let mut cursor = token.map(str::to_string);

        loop {
            let page = self.source.fetch_items(resource, cursor.as_deref(), fields)?;
            stats.pages_fetched += 1;
            items.extend(page.items);

            if let Some(delta_token) = page.delta_token {
                return Ok(Fetched {
                    items,
                    delta_token: Some(delta_token),
                    truncated: false,
                });
            }

            let Some(next) = page.next_link else {
                return Ok(Fetched {
                    items,
                    delta_token: None,
                    truncated: false,
                });
            };

            if let Some(cap) = self.page_cap
                && items.len() >= cap
            {
                log::warn!(
                    "Stopping fetch of {} at {} items (page cap {})",
                    resource,
                    items.len(),
                    cap
                );
                return Ok(Fetched {
                    items,
                    delta_token: None,
                    truncated: true,
                });
            }
            cursor = Some(next);
        }
    }
}

fn item_id(item: &ItemRecord) -> &str {
    &item.id
}

fn item_revision(item: &ItemRecord) -> &str {
    &item.revision
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnMapping, ResourceSchema};
    use crate::source::InMemorySource;
    use crate::storage::InMemoryListStore;

    fn setup() -> (Arc<InMemorySource>, Arc<InMemoryListStore>, TrackedResource) {
        let source = Arc::new(InMemorySource::with_page_size(2));
        let store = Arc::new(InMemoryListStore::new());
        let r = ResourceRef::new("site", "list");
        source.put_list(&r, "v1", "tasks", "Tasks");
        let tracked = TrackedResource::new(
            r,
            ResourceSchema::new("tasks", vec![ColumnMapping::new("title", "Title")]),
        );
        (source, store, tracked)
    }

    fn reconciler(source: &Arc<InMemorySource>, store: &Arc<InMemoryListStore>) -> ListReconciler {
        ListReconciler::new(source.clone(), store.clone())
    }

    #[test]
    fn test_first_pass_is_full_then_incremental() {
        let (source, store, tracked) = setup();
        let r = tracked.resource.clone();
        for i in 1..=5 {
            source.put_item(ItemRecord::new(&r, i.to_string(), "e1").with_field("Title", "t"));
        }

        let stats = reconciler(&source, &store).reconcile(&tracked).unwrap();
        assert_eq!(stats.mode, SyncMode::Full);
        assert!(stats.metadata_changed);
        assert_eq!(stats.items_inserted, 5);
        assert_eq!(stats.pages_fetched, 3);
        assert!(store.get_continuation_token(&r).unwrap().is_some());

        source.put_item(ItemRecord::new(&r, "2", "e2"));
        source.remove_item(&r, "4");

        let stats = reconciler(&source, &store).reconcile(&tracked).unwrap();
        assert_eq!(stats.mode, SyncMode::Incremental);
        assert!(!stats.metadata_changed);
        assert_eq!(stats.items_updated, 1);
        assert_eq!(stats.items_deleted, 1);
        assert_eq!(store.get_items(&tracked.schema, &r).unwrap().len(), 4);
    }

    #[test]
    fn test_metadata_update_keeps_token() {
        let (source, store, tracked) = setup();
        let r = tracked.resource.clone();
        reconciler(&source, &store).reconcile(&tracked).unwrap();
        let token = store.get_continuation_token(&r).unwrap();
        assert!(token.is_some());

        source.put_list(&r, "v2", "tasks", "Renamed");
        // No item changes, so the pass ends with a fresh token from the source
        let stats = reconciler(&source, &store).reconcile(&tracked).unwrap();
        assert!(stats.metadata_changed);
        assert_eq!(stats.mode, SyncMode::Incremental);
        assert_eq!(store.get_list(&r).unwrap().unwrap().display_name, "Renamed");
    }

    #[test]
    fn test_metadata_failure_clears_token() {
        let (source, store, tracked) = setup();
        let r = tracked.resource.clone();
        reconciler(&source, &store).reconcile(&tracked).unwrap();

        let missing = TrackedResource::new(
            ResourceRef::new("site", "gone"),
            tracked.schema.clone(),
        );
        assert!(reconciler(&source, &store).reconcile(&missing).is_err());
        // The failing list had no token to begin with; the healthy one keeps its own
        assert!(store.get_continuation_token(&r).unwrap().is_some());

        source.fail_next_fetch(SyncError::source_fetch("timeout"));
        assert!(reconciler(&source, &store).reconcile(&tracked).is_err());
        assert!(store.get_continuation_token(&r).unwrap().is_none());
    }

    #[test]
    fn test_full_pass_removes_local_only_items() {
        let (source, store, tracked) = setup();
        let r = tracked.resource.clone();
        source.put_item(ItemRecord::new(&r, "1", "e1"));
        store.prepare_items(&tracked.schema).unwrap();
        store.upsert_items(&tracked.schema, &[ItemRecord::new(&r, "stale", "e1")]).unwrap();

        let stats = reconciler(&source, &store).reconcile(&tracked).unwrap();
        assert_eq!(stats.items_inserted, 1);
        assert_eq!(stats.items_deleted, 1);
        let ids: Vec<String> = store
            .get_items(&tracked.schema, &r)
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, vec!["1"]);
    }
}
