//! List metadata record

use serde::{Deserialize, Serialize};

use super::ResourceRef;

/// Metadata of one tracked list, as stored locally
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListRecord {
    pub id: String,
    pub site_id: String,
    /// Opaque revision marker (Graph eTag)
    pub revision: String,
    pub name: String,
    pub display_name: String,
    /// Delta cursor for the next incremental item fetch
    pub continuation_token: Option<String>,
}

impl ListRecord {
    pub fn new(
        resource: &ResourceRef,
        revision: impl Into<String>,
        name: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            id: resource.list_id.clone(),
            site_id: resource.site_id.clone(),
            revision: revision.into(),
            name: name.into(),
            display_name: display_name.into(),
            continuation_token: None,
        }
    }

    pub fn resource(&self) -> ResourceRef {
        ResourceRef::new(&self.site_id, &self.id)
    }
}
