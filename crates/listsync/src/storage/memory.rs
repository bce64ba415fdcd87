//! In-memory storage implementation
//!
//! This implementation is used for testing. Items are kept per table and
//! projected onto the schema's mapped fields, the same way the SQLite store
//! only keeps mapped columns.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::ListStore;
use crate::error::{Result, SyncError};
use crate::models::{ItemRecord, ListRecord, ResourceRef, ResourceSchema};

/// In-memory implementation of ListStore
///
/// Uses HashMaps protected by RwLocks for thread-safe access.
pub struct InMemoryListStore {
    lists: RwLock<HashMap<ResourceRef, ListRecord>>,
    /// table -> id -> item
    tables: RwLock<HashMap<String, BTreeMap<String, ItemRecord>>>,
    /// Item writes allowed before every further item write fails
    write_budget: Mutex<Option<usize>>,
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| SyncError::store("store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| SyncError::store("store lock poisoned"))
}

impl InMemoryListStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            lists: RwLock::new(HashMap::new()),
            tables: RwLock::new(HashMap::new()),
            write_budget: Mutex::new(None),
        }
    }

    /// Let `writes` more item writes succeed, then fail every one after
    pub fn fail_item_writes_after(&self, writes: usize) {
        if let Ok(mut budget) = self.write_budget.lock() {
            *budget = Some(writes);
        }
    }

    /// Remove the write failure set by [`Self::fail_item_writes_after`]
    pub fn clear_write_failures(&self) {
        if let Ok(mut budget) = self.write_budget.lock() {
            *budget = None;
        }
    }

    fn charge_write(&self) -> Result<()> {
        let mut budget = self
            .write_budget
            .lock()
            .map_err(|_| SyncError::store("store lock poisoned"))?;
        match budget.as_mut() {
            Some(0) => Err(SyncError::store("injected item write failure")),
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn project(schema: &ResourceSchema, item: &ItemRecord) -> ItemRecord {
        let mut stored = item.clone();
        stored.fields = schema
            .columns
            .iter()
            .map(|c| {
                let value = item.fields.get(&c.field).cloned().unwrap_or_default();
                (c.field.clone(), value)
            })
            .collect();
        stored
    }

    fn write_item(&self, schema: &ResourceSchema, item: &ItemRecord) -> Result<()> {
        self.charge_write()?;
        let mut tables = write(&self.tables)?;
        let table = tables.get_mut(&schema.table).ok_or_else(|| {
            SyncError::store(format!("item table '{}' has not been prepared", schema.table))
        })?;
        table.insert(item.id.clone(), Self::project(schema, item));
        Ok(())
    }
}

impl Default for InMemoryListStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ListStore for InMemoryListStore {
    fn get_list(&self, resource: &ResourceRef) -> Result<Option<ListRecord>> {
        Ok(read(&self.lists)?.get(resource).cloned())
    }

    fn upsert_lists(&self, lists: &[ListRecord]) -> Result<()> {
        let mut stored = write(&self.lists)?;
        for list in lists {
            let key = list.resource();
            let token = stored.get(&key).and_then(|l| l.continuation_token.clone());
            let mut record = list.clone();
            record.continuation_token = token;
            stored.insert(key, record);
        }
        Ok(())
    }

    fn delete_list(&self, resource: &ResourceRef) -> Result<()> {
        write(&self.lists)?.remove(resource);
        Ok(())
    }

    fn get_continuation_token(&self, resource: &ResourceRef) -> Result<Option<String>> {
        Ok(read(&self.lists)?
            .get(resource)
            .and_then(|l| l.continuation_token.clone()))
    }

    fn set_continuation_token(&self, resource: &ResourceRef, token: &str) -> Result<()> {
        let mut lists = write(&self.lists)?;
        let list = lists
            .get_mut(resource)
            .ok_or_else(|| SyncError::store(format!("no list row for {}", resource)))?;
        list.continuation_token = Some(token.to_string());
        Ok(())
    }

    fn clear_continuation_token(&self, resource: &ResourceRef) -> Result<()> {
        if let Some(list) = write(&self.lists)?.get_mut(resource) {
            list.continuation_token = None;
        }
        Ok(())
    }

    fn prepare_items(&self, schema: &ResourceSchema) -> Result<()> {
        write(&self.tables)?.entry(schema.table.clone()).or_default();
        Ok(())
    }

    fn get_items(&self, schema: &ResourceSchema, resource: &ResourceRef) -> Result<Vec<ItemRecord>> {
        let tables = read(&self.tables)?;
        let Some(table) = tables.get(&schema.table) else {
            return Ok(Vec::new());
        };
        Ok(table
            .values()
            .filter(|i| i.site_id == resource.site_id && i.list_id == resource.list_id)
            .cloned()
            .collect())
    }

    fn upsert_items(&self, schema: &ResourceSchema, items: &[ItemRecord]) -> Result<()> {
        // All-or-nothing, like the SQLite transaction
        let mut staged = match read(&self.tables)?.get(&schema.table) {
            Some(table) => table.clone(),
            None => {
                return Err(SyncError::store(format!(
                    "item table '{}' has not been prepared",
                    schema.table
                )));
            }
        };
        for item in items {
            self.charge_write()?;
            staged.insert(item.id.clone(), Self::project(schema, item));
        }
        write(&self.tables)?.insert(schema.table.clone(), staged);
        Ok(())
    }

    fn update_item(&self, schema: &ResourceSchema, item: &ItemRecord) -> Result<()> {
        self.write_item(schema, item)
    }

    fn delete_item(&self, schema: &ResourceSchema, id: &str) -> Result<()> {
        self.charge_write()?;
        if let Some(table) = write(&self.tables)?.get_mut(&schema.table) {
            table.remove(id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ColumnMapping;

    fn schema() -> ResourceSchema {
        ResourceSchema::new("tasks", vec![ColumnMapping::new("title", "Title")])
    }

    #[test]
    fn test_upsert_lists_preserves_token() {
        let store = InMemoryListStore::new();
        let r = ResourceRef::new("s", "l");
        store.upsert_lists(&[ListRecord::new(&r, "v1", "tasks", "Tasks")]).unwrap();
        store.set_continuation_token(&r, "delta:1").unwrap();

        store.upsert_lists(&[ListRecord::new(&r, "v2", "tasks", "Tasks")]).unwrap();

        let list = store.get_list(&r).unwrap().unwrap();
        assert_eq!(list.revision, "v2");
        assert_eq!(list.continuation_token.as_deref(), Some("delta:1"));
    }

    #[test]
    fn test_set_token_requires_list() {
        let store = InMemoryListStore::new();
        let r = ResourceRef::new("s", "l");
        assert!(store.set_continuation_token(&r, "delta:1").is_err());
        assert!(store.clear_continuation_token(&r).is_ok());
    }

    #[test]
    fn test_items_are_projected_onto_schema() {
        let store = InMemoryListStore::new();
        let r = ResourceRef::new("s", "l");
        store.prepare_items(&schema()).unwrap();

        let item = ItemRecord::new(&r, "1", "v1")
            .with_field("Title", "Write docs")
            .with_field("Unmapped", 7);
        store.upsert_items(&schema(), &[item]).unwrap();

        let items = store.get_items(&schema(), &r).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].fields.len(), 1);
        assert_eq!(items[0].fields["Title"], "Write docs");
    }

    #[test]
    fn test_write_budget() {
        let store = InMemoryListStore::new();
        let r = ResourceRef::new("s", "l");
        store.prepare_items(&schema()).unwrap();
        store.fail_item_writes_after(1);

        let items = vec![ItemRecord::new(&r, "1", "v1"), ItemRecord::new(&r, "2", "v1")];
        assert!(store.upsert_items(&schema(), &items).is_err());
        // The failed batch left nothing behind
        assert!(store.get_items(&schema(), &r).unwrap().is_empty());

        store.clear_write_failures();
        store.upsert_items(&schema(), &items).unwrap();
        assert_eq!(store.get_items(&schema(), &r).unwrap().len(), 2);
    }
}
