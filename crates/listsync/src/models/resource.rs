//! Tracked resource identity and its local schema

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::error::{Result, SyncError};

/// Metadata columns every item table carries, in insert order
pub const ITEM_METADATA_COLUMNS: [&str; 4] = ["id", "list_id", "site_id", "etag"];

/// Identity of a tracked remote list (site + list)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub site_id: String,
    pub list_id: String,
}

impl ResourceRef {
    pub fn new(site_id: impl Into<String>, list_id: impl Into<String>) -> Self {
        Self {
            site_id: site_id.into(),
            list_id: list_id.into(),
        }
    }

    /// Canonical descriptor used for subscriptions and notifications
    pub fn descriptor(&self) -> ResourceDescriptor {
        ResourceDescriptor(format!("sites/{}/lists/{}", self.site_id, self.list_id))
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.site_id, self.list_id)
    }
}

/// Canonical string identifying a remote list: `sites/{site}/lists/{list}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceDescriptor(pub String);

impl ResourceDescriptor {
    pub fn new(descriptor: impl Into<String>) -> Self {
        Self(descriptor.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse the descriptor back into a resource reference
    pub fn parse(&self) -> Result<ResourceRef> {
        let parts: Vec<&str> = self.0.trim_start_matches('/').split('/').collect();
        if parts.len() < 4
            || parts[0] != "sites"
            || parts[2] != "lists"
            || parts[1].is_empty()
            || parts[3].is_empty()
        {
            return Err(SyncError::malformed(format!(
                "resource '{}' does not match 'sites/{{site}}/lists/{{list}}'",
                self.0
            )));
        }
        Ok(ResourceRef::new(parts[1], parts[3]))
    }
}

impl fmt::Display for ResourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceDescriptor {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One local column fed by one remote field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    /// Column name in the local item table
    pub column: String,
    /// Field name on the remote item
    pub field: String,
}

impl ColumnMapping {
    pub fn new(column: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            field: field.into(),
        }
    }
}

/// Local table layout for one tracked list
///
/// Columns are ordered; the order is the column order of the item table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSchema {
    pub table: String,
    #[serde(default)]
    pub columns: Vec<ColumnMapping>,
}

impl ResourceSchema {
    pub fn new(table: impl Into<String>, columns: Vec<ColumnMapping>) -> Self {
        Self {
            table: table.into(),
            columns,
        }
    }

    /// Remote field names to request, in column order
    pub fn field_selector(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.field.clone()).collect()
    }

    /// Reject table and column names that cannot be used as SQL identifiers
    pub fn validate(&self) -> Result<()> {
        if !is_identifier(&self.table) {
            return Err(SyncError::config(format!(
                "table name '{}' is not a valid identifier",
                self.table
            )));
        }

        let mut seen = HashSet::new();
        for mapping in &self.columns {
            if !is_identifier(&mapping.column) {
                return Err(SyncError::config(format!(
                    "column '{}' in table '{}' is not a valid identifier",
                    mapping.column, self.table
                )));
            }
            if mapping.field.trim().is_empty() {
                return Err(SyncError::config(format!(
                    "column '{}' in table '{}' has an empty source field",
                    mapping.column, self.table
                )));
            }
            let lowered = mapping.column.to_ascii_lowercase();
            if ITEM_METADATA_COLUMNS.contains(&lowered.as_str()) {
                return Err(SyncError::config(format!(
                    "column '{}' in table '{}' collides with a metadata column",
                    mapping.column, self.table
                )));
            }
            if !seen.insert(lowered) {
                return Err(SyncError::config(format!(
                    "column '{}' is mapped twice in table '{}'",
                    mapping.column, self.table
                )));
            }
        }
        Ok(())
    }
}

/// A configured list: where it lives remotely and how it is stored locally
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedResource {
    #[serde(flatten)]
    pub resource: ResourceRef,
    #[serde(flatten)]
    pub schema: ResourceSchema,
}

impl TrackedResource {
    pub fn new(resource: ResourceRef, schema: ResourceSchema) -> Self {
        Self { resource, schema }
    }

    pub fn descriptor(&self) -> ResourceDescriptor {
        self.resource.descriptor()
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_round_trip() {
        let r = ResourceRef::new("site-1", "list-1");
        let descriptor = r.descriptor();
        assert_eq!(descriptor.as_str(), "sites/site-1/lists/list-1");
        assert_eq!(descriptor.parse().unwrap(), r);
    }

    #[test]
    fn test_descriptor_tolerates_leading_slash_and_suffix() {
        let descriptor = ResourceDescriptor::from("/sites/s/lists/l/items");
        assert_eq!(descriptor.parse().unwrap(), ResourceRef::new("s", "l"));
    }

    #[test]
    fn test_descriptor_rejects_bad_shapes() {
        for bad in ["", "sites/s", "site/s/lists/l", "sites/s/list/l", "sites//lists/l"] {
            let err = ResourceDescriptor::from(bad).parse().unwrap_err();
            assert!(matches!(err, SyncError::MalformedNotification { .. }), "{bad}");
        }
    }

    #[test]
    fn test_schema_validation() {
        let ok = ResourceSchema::new(
            "tasks",
            vec![ColumnMapping::new("title", "Title"), ColumnMapping::new("due_on", "DueDate")],
        );
        assert!(ok.validate().is_ok());
        assert_eq!(ok.field_selector(), vec!["Title", "DueDate"]);

        let bad_table = ResourceSchema::new("tasks; drop", vec![]);
        assert!(bad_table.validate().is_err());

        let reserved = ResourceSchema::new("tasks", vec![ColumnMapping::new("ETag", "x")]);
        assert!(reserved.validate().is_err());

        let duplicate = ResourceSchema::new(
            "tasks",
            vec![ColumnMapping::new("title", "Title"), ColumnMapping::new("TITLE", "Other")],
        );
        assert!(duplicate.validate().is_err());

        let empty_field = ResourceSchema::new("tasks", vec![ColumnMapping::new("title", " ")]);
        assert!(empty_field.validate().is_err());
    }

    #[test]
    fn test_tracked_resource_deserializes_flat() {
        let json = r#"{
            "site_id": "s1",
            "list_id": "l1",
            "table": "tasks",
            "columns": [{"column": "title", "field": "Title"}]
        }"#;
        let tracked: TrackedResource = serde_json::from_str(json).unwrap();
        assert_eq!(tracked.resource, ResourceRef::new("s1", "l1"));
        assert_eq!(tracked.schema.table, "tasks");
        assert_eq!(tracked.schema.columns.len(), 1);
    }
}
