//! Storage trait definitions

use crate::error::Result;
use crate::models::{ItemRecord, ListRecord, ResourceRef, ResourceSchema};

/// Trait for local list storage operations
///
/// Every write is committed on its own: a batch upsert is one transaction,
/// and each update or delete is another. Implementations map their own
/// failures into [`crate::SyncError::StoreWrite`].
pub trait ListStore: Send + Sync {
    /// Get the stored metadata for a list
    fn get_list(&self, resource: &ResourceRef) -> Result<Option<ListRecord>>;

    /// Insert or update list metadata
    ///
    /// The stored continuation token is left untouched; `continuation_token`
    /// on the records is ignored.
    fn upsert_lists(&self, lists: &[ListRecord]) -> Result<()>;

    /// Delete list metadata (and its token)
    fn delete_list(&self, resource: &ResourceRef) -> Result<()>;

    /// Get the continuation token for a list
    fn get_continuation_token(&self, resource: &ResourceRef) -> Result<Option<String>>;

    /// Store the continuation token for a list
    ///
    /// Fails if the list has no metadata row yet.
    fn set_continuation_token(&self, resource: &ResourceRef, token: &str) -> Result<()>;

    /// Remove the continuation token for a list (no-op when absent)
    fn clear_continuation_token(&self, resource: &ResourceRef) -> Result<()>;

    /// Create the item table for a schema, adding any missing columns
    fn prepare_items(&self, schema: &ResourceSchema) -> Result<()>;

    /// Get every stored item of a list, fields keyed by remote field name
    fn get_items(&self, schema: &ResourceSchema, resource: &ResourceRef) -> Result<Vec<ItemRecord>>;

    /// Insert or replace a batch of items in one transaction
    fn upsert_items(&self, schema: &ResourceSchema, items: &[ItemRecord]) -> Result<()>;

    /// Write the new revision and fields of one item
    fn update_item(&self, schema: &ResourceSchema, item: &ItemRecord) -> Result<()>;

    /// Delete one item (no-op when absent)
    fn delete_item(&self, schema: &ResourceSchema, id: &str) -> Result<()>;
}
