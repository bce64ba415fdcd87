//! Continuation token state
//!
//! The stored token decides how the next pass fetches items: with a token
//! the source is asked for changes since the token, without one the whole
//! list is enumerated again.

use std::fmt;

use crate::error::{Result, SyncError};
use crate::models::ResourceRef;
use crate::storage::ListStore;

/// How a pass fetches and diffs items
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Enumerate everything and diff against the full local set
    Full,
    /// Fetch changes since the stored token
    Incremental,
}

impl SyncMode {
    pub fn for_token(token: Option<&str>) -> Self {
        match token {
            Some(_) => SyncMode::Incremental,
            None => SyncMode::Full,
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Full => f.write_str("full"),
            SyncMode::Incremental => f.write_str("incremental"),
        }
    }
}

/// Per-resource continuation token manager
pub struct DeltaState<'a> {
    store: &'a dyn ListStore,
}

impl<'a> DeltaState<'a> {
    pub fn new(store: &'a dyn ListStore) -> Self {
        Self { store }
    }

    pub fn get_token(&self, resource: &ResourceRef) -> Result<Option<String>> {
        self.store.get_continuation_token(resource)
    }

    pub fn set_token(&self, resource: &ResourceRef, token: &str) -> Result<()> {
        self.store.set_continuation_token(resource, token)
    }

    pub fn clear_token(&self, resource: &ResourceRef) -> Result<()> {
        self.store.clear_continuation_token(resource)
    }

    /// Fetch mode implied by the stored token
    pub fn mode(&self, resource: &ResourceRef) -> Result<SyncMode> {
        Ok(SyncMode::for_token(self.get_token(resource)?.as_deref()))
    }

    /// Clear the token after a failed pass and hand back the pass error
    ///
    /// A failure to clear is logged; the pass error is what the caller sees.
    pub fn reset_after_failure(&self, resource: &ResourceRef, error: SyncError) -> SyncError {
        if let Err(clear_error) = self.clear_token(resource) {
            log::error!(
                "Failed to clear continuation token for {} after error ({}): {}",
                resource,
                error,
                clear_error
            );
        }
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ListRecord;
    use crate::storage::InMemoryListStore;

    #[test]
    fn test_mode_follows_token() {
        let store = InMemoryListStore::new();
        let r = ResourceRef::new("s", "l");
        store.upsert_lists(&[ListRecord::new(&r, "v1", "l", "L")]).unwrap();
        let state = DeltaState::new(&store);

        assert_eq!(state.mode(&r).unwrap(), SyncMode::Full);
        state.set_token(&r, "delta:4").unwrap();
        assert_eq!(state.mode(&r).unwrap(), SyncMode::Incremental);

        let err = state.reset_after_failure(&r, SyncError::source_fetch("timeout"));
        assert!(matches!(err, SyncError::SourceFetch { .. }));
        assert_eq!(state.mode(&r).unwrap(), SyncMode::Full);
    }

    #[test]
    fn test_reset_without_list_row_keeps_error() {
        let store = InMemoryListStore::new();
        let state = DeltaState::new(&store);
        let err = state.reset_after_failure(&ResourceRef::new("s", "l"), SyncError::TokenInvalid);
        assert!(matches!(err, SyncError::TokenInvalid));
    }
}
