//! Inbound notification payloads
//!
//! The source posts batches wrapped in a `{"value": [...]}` envelope. Parsing
//! only checks shape; matching against configured resources happens in the
//! change trigger.

use serde::Deserialize;

use super::ResourceDescriptor;
use crate::error::{Result, SyncError};

/// Resource data type carried by list item change notifications
pub const LIST_ITEM_DATA_TYPE: &str = "#Microsoft.Graph.ListItem";

/// A change on a subscribed resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotification {
    pub resource: ResourceDescriptor,
    pub change_type: String,
    pub subscription_id: Option<String>,
}

/// A subscription lifecycle event (e.g. reauthorization required)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleNotification {
    pub subscription_id: String,
    pub lifecycle_event: Option<String>,
}

#[derive(Deserialize)]
struct Envelope<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangePayload {
    resource: Option<String>,
    change_type: Option<String>,
    subscription_id: Option<String>,
    resource_data: Option<ResourceData>,
}

#[derive(Deserialize)]
struct ResourceData {
    #[serde(rename = "@odata.type")]
    odata_type: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LifecyclePayload {
    subscription_id: Option<String>,
    lifecycle_event: Option<String>,
}

impl ChangeNotification {
    /// Parse a change notification batch
    pub fn parse_batch(body: &[u8]) -> Result<Vec<ChangeNotification>> {
        let envelope: Envelope<ChangePayload> = serde_json::from_slice(body)
            .map_err(|e| SyncError::malformed(format!("invalid request body: {}", e)))?;

        if envelope.value.is_empty() {
            return Err(SyncError::malformed("notification batch is empty"));
        }

        envelope
            .value
            .into_iter()
            .map(|payload| {
                if let Some(data_type) = payload.resource_data.and_then(|d| d.odata_type)
                    && data_type != LIST_ITEM_DATA_TYPE
                {
                    return Err(SyncError::malformed(format!(
                        "invalid data type: '{}', expected: '{}'",
                        data_type, LIST_ITEM_DATA_TYPE
                    )));
                }

                let resource = payload
                    .resource
                    .filter(|r| !r.is_empty())
                    .ok_or_else(|| SyncError::malformed("notification is missing a resource"))?;

                Ok(ChangeNotification {
                    resource: ResourceDescriptor::new(resource),
                    change_type: payload.change_type.unwrap_or_else(|| "updated".to_string()),
                    subscription_id: payload.subscription_id,
                })
            })
            .collect()
    }
}

impl LifecycleNotification {
    /// Parse a lifecycle notification batch
    pub fn parse_batch(body: &[u8]) -> Result<Vec<LifecycleNotification>> {
        let envelope: Envelope<LifecyclePayload> = serde_json::from_slice(body)
            .map_err(|e| SyncError::malformed(format!("failed to parse JSON: {}", e)))?;

        if envelope.value.is_empty() {
            return Err(SyncError::malformed("missing subscriptionId in the lifecycle body"));
        }

        envelope
            .value
            .into_iter()
            .map(|payload| {
                let subscription_id = payload
                    .subscription_id
                    .filter(|id| !id.is_empty())
                    .ok_or_else(|| {
                        SyncError::malformed("missing subscriptionId in the lifecycle body")
                    })?;
                Ok(LifecycleNotification {
                    subscription_id,
                    lifecycle_event: payload.lifecycle_event,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_change_batch() {
        let body = br##"{
            "value": [{
                "subscriptionId": "sub-1",
                "changeType": "updated",
                "resource": "sites/s1/lists/l1",
                "resourceData": {"@odata.type": "#Microsoft.Graph.ListItem"}
            }]
        }"##;

        let parsed = ChangeNotification::parse_batch(body).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].resource.as_str(), "sites/s1/lists/l1");
        assert_eq!(parsed[0].change_type, "updated");
        assert_eq!(parsed[0].subscription_id.as_deref(), Some("sub-1"));
    }

    #[test]
    fn test_parse_change_rejects_wrong_type() {
        let body = br##"{
            "value": [{
                "resource": "sites/s1/lists/l1",
                "resourceData": {"@odata.type": "#Microsoft.Graph.DriveItem"}
            }]
        }"##;
        let err = ChangeNotification::parse_batch(body).unwrap_err();
        assert!(err.to_string().contains("DriveItem"));
    }

    #[test]
    fn test_parse_change_rejects_bad_bodies() {
        assert!(ChangeNotification::parse_batch(b"not json").is_err());
        assert!(ChangeNotification::parse_batch(br#"{"value": []}"#).is_err());
        let err = ChangeNotification::parse_batch(b"{}").unwrap_err();
        assert!(err.to_string().contains("empty"));
        assert!(ChangeNotification::parse_batch(br#"{"value": [{"changeType": "updated"}]}"#).is_err());
    }

    #[test]
    fn test_parse_lifecycle_batch() {
        let body = br#"{"value": [
            {"subscriptionId": "a", "lifecycleEvent": "reauthorizationRequired"},
            {"subscriptionId": "b"}
        ]}"#;
        let parsed = LifecycleNotification::parse_batch(body).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].subscription_id, "a");
        assert_eq!(parsed[0].lifecycle_event.as_deref(), Some("reauthorizationRequired"));
        assert_eq!(parsed[1].lifecycle_event, None);
    }

    #[test]
    fn test_parse_lifecycle_requires_id() {
        assert!(LifecycleNotification::parse_batch(br#"{"value": []}"#).is_err());
        assert!(LifecycleNotification::parse_batch(br#"{"value": [{"subscriptionId": ""}]}"#).is_err());
        assert!(LifecycleNotification::parse_batch(b"{").is_err());
        assert!(LifecycleNotification::parse_batch(br#"{"validationTokens": []}"#).is_err());
    }
}
