//! List item record

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::ResourceRef;

/// One item of a tracked list
///
/// `fields` is keyed by the remote field name. An empty `revision` on an
/// item coming out of an incremental fetch means the item was deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: String,
    pub list_id: String,
    pub site_id: String,
    pub revision: String,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
}

impl ItemRecord {
    pub fn new(resource: &ResourceRef, id: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            list_id: resource.list_id.clone(),
            site_id: resource.site_id.clone(),
            revision: revision.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field setter
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Whether this record is the source's deletion marker
    pub fn is_tombstone(&self) -> bool {
        self.revision.is_empty()
    }
}
