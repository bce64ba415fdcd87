//! Microsoft Graph HTTP client
//!
//! Provides the list, delta and subscription calls the reconcilers need.
//! Uses synchronous HTTP (ureq) to be executor-agnostic.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use std::time::Duration;

use super::{GraphAuth, ItemPage, RemoteSource};
use crate::config::GraphSettings;
use crate::error::{Result, SyncError};
use crate::models::{ItemRecord, ListRecord, ResourceDescriptor, ResourceRef, SubscriptionRecord};

/// Graph API response types
pub mod api {
    use serde::Deserialize;
    use serde_json::{Map, Value};

    /// Response from `GET /sites/{site}/lists/{list}`
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ListResponse {
        #[serde(rename = "eTag")]
        pub e_tag: Option<String>,
        pub name: Option<String>,
        pub display_name: Option<String>,
    }

    /// One page of `GET .../items/delta`
    #[derive(Debug, Deserialize)]
    pub struct DeltaResponse {
        #[serde(default)]
        pub value: Vec<ListItemResponse>,
        #[serde(rename = "@odata.nextLink")]
        pub next_link: Option<String>,
        #[serde(rename = "@odata.deltaLink")]
        pub delta_link: Option<String>,
    }

    /// A list item as returned by the delta endpoint
    #[derive(Debug, Deserialize)]
    pub struct ListItemResponse {
        pub id: String,
        #[serde(rename = "eTag")]
        pub e_tag: Option<String>,
        pub fields: Option<Map<String, Value>>,
        /// Present when the item was removed since the last delta
        pub deleted: Option<Value>,
    }

    /// Response from `GET /subscriptions`
    #[derive(Debug, Deserialize)]
    pub struct SubscriptionsResponse {
        #[serde(default)]
        pub value: Vec<SubscriptionResponse>,
        #[serde(rename = "@odata.nextLink")]
        pub next_link: Option<String>,
    }

    /// A subscription resource
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SubscriptionResponse {
        pub id: String,
        pub resource: String,
        pub notification_url: String,
        pub lifecycle_notification_url: Option<String>,
        pub expiration_date_time: chrono::DateTime<chrono::Utc>,
    }
}

/// Graph API client implementing [`RemoteSource`]
pub struct GraphClient {
    base_url: String,
    auth: GraphAuth,
    agent: ureq::Agent,
}

impl GraphClient {
    /// Per-request timeout
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

    /// Create a new Graph client from settings
    pub fn new(settings: &GraphSettings) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(Self::REQUEST_TIMEOUT))
            .build()
            .into();

        Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            auth: GraphAuth::new(settings, agent.clone()),
            agent,
        }
    }

    /// Check that credentials are accepted by requesting a token
    pub fn authenticate(&self) -> Result<()> {
        self.auth.get_access_token()?;
        Ok(())
    }

    fn bearer(&self) -> Result<String> {
        Ok(format!("Bearer {}", self.auth.get_access_token()?))
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str, what: &str) -> Result<T> {
        let response = self
            .agent
            .get(url)
            .header("Authorization", &self.bearer()?)
            .call();
        self.read_json(response, what)
    }

    fn read_json<T: DeserializeOwned>(
        &self,
        response: std::result::Result<ureq::http::Response<ureq::Body>, ureq::Error>,
        what: &str,
    ) -> Result<T> {
        match response {
            Ok(mut resp) => resp
                .body_mut()
                .read_json()
                .map_err(|e| SyncError::source_fetch(format!("Failed to parse {}: {}", what, e))),
            Err(e) => Err(self.classify(e, what)),
        }
    }

    fn classify(&self, error: ureq::Error, what: &str) -> SyncError {
        match error {
            ureq::Error::StatusCode(status @ (401 | 403)) => {
                self.auth.invalidate();
                SyncError::SourceAuth {
                    message: format!("{} rejected with HTTP {}", what, status),
                }
            }
            ureq::Error::StatusCode(status) => {
                SyncError::source_fetch(format!("{} failed with HTTP {}", what, status))
            }
            e => SyncError::source_fetch(format!("Failed to send {} request: {}", what, e)),
        }
    }

    fn delta_url(&self, resource: &ResourceRef, fields: &[String]) -> String {
        let expand = if fields.is_empty() {
            "fields".to_string()
        } else {
            format!("fields($select={})", fields.join(","))
        };
        format!(
            "{}/sites/{}/lists/{}/items/delta?$expand={}",
            self.base_url,
            urlencoding::encode(&resource.site_id),
            urlencoding::encode(&resource.list_id),
            urlencoding::encode(&expand)
        )
    }

    fn to_subscription(sub: api::SubscriptionResponse) -> SubscriptionRecord {
        SubscriptionRecord {
            id: sub.id,
            resource: ResourceDescriptor::new(sub.resource),
            notification_url: sub.notification_url,
            lifecycle_url: sub.lifecycle_notification_url.unwrap_or_default(),
            expires_at: sub.expiration_date_time,
        }
    }
}

/// Convert a delta item into a record; removed items get an empty revision
fn to_item(resource: &ResourceRef, item: api::ListItemResponse) -> ItemRecord {
    let revision = if item.deleted.is_some() {
        String::new()
    } else {
        item.e_tag.unwrap_or_default()
    };

    let mut record = ItemRecord::new(resource, item.id, revision);
    let mut fields: Map<String, Value> = item.fields.unwrap_or_default();
    fields.remove("@odata.etag");
    record.fields = fields.into_iter().collect();
    record
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl RemoteSource for GraphClient {
    fn get_list_metadata(&self, resource: &ResourceRef) -> Result<ListRecord> {
        let url = format!(
            "{}/sites/{}/lists/{}?$select=eTag,name,displayName",
            self.base_url,
            urlencoding::encode(&resource.site_id),
            urlencoding::encode(&resource.list_id)
        );

        let list: api::ListResponse = self.get_json(&url, "list metadata")?;

        Ok(ListRecord::new(
            resource,
            list.e_tag.unwrap_or_default(),
            list.name.unwrap_or_default(),
            list.display_name.unwrap_or_default(),
        ))
    }

    fn fetch_items(
        &self,
        resource: &ResourceRef,
        cursor: Option<&str>,
        fields: &[String],
    ) -> Result<ItemPage> {
        let url = match cursor {
            Some(cursor) => cursor.to_string(),
            None => self.delta_url(resource, fields),
        };

        let response = self
            .agent
            .get(&url)
            .header("Authorization", &self.bearer()?)
            .call();

        let page: api::DeltaResponse = match response {
            // Graph answers an expired delta link with 410 Gone (resyncRequired)
            Err(ureq::Error::StatusCode(404 | 410)) if cursor.is_some() => {
                return Err(SyncError::TokenInvalid);
            }
            other => self.read_json(other, "list items")?,
        };

        Ok(ItemPage {
            items: page.value.into_iter().map(|item| to_item(resource, item)).collect(),
            next_link: page.next_link,
            delta_token: page.delta_link,
        })
    }

    fn list_subscriptions(&self) -> Result<Vec<SubscriptionRecord>> {
        let mut all = Vec::new();
        let mut url = format!("{}/subscriptions", self.base_url);

        loop {
            let page: api::SubscriptionsResponse = self.get_json(&url, "subscriptions")?;
            all.extend(page.value.into_iter().map(Self::to_subscription));

            match page.next_link {
                Some(next) => url = next,
                None => break,
            }
        }

        log::debug!("Listed {} subscriptions", all.len());
        Ok(all)
    }

    fn create_subscription(
        &self,
        resource: &ResourceDescriptor,
        notification_url: &str,
        lifecycle_url: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<SubscriptionRecord> {
        let body = json!({
            "changeType": "updated",
            "notificationUrl": notification_url,
            "lifecycleNotificationUrl": lifecycle_url,
            "resource": resource.as_str(),
            "expirationDateTime": timestamp(expires_at),
            "latestSupportedTlsVersion": "v1_2",
        });

        let response = self
            .agent
            .post(&format!("{}/subscriptions", self.base_url))
            .header("Authorization", &self.bearer()?)
            .send_json(&body);

        let created: api::SubscriptionResponse = self.read_json(response, "create subscription")?;
        Ok(Self::to_subscription(created))
    }

    fn renew_subscription(&self, id: &str, expires_at: DateTime<Utc>) -> Result<SubscriptionRecord> {
        let body = json!({ "expirationDateTime": timestamp(expires_at) });

        let response = self
            .agent
            .patch(&format!(
                "{}/subscriptions/{}",
                self.base_url,
                urlencoding::encode(id)
            ))
            .header("Authorization", &self.bearer()?)
            .send_json(&body);

        let renewed: api::SubscriptionResponse = self.read_json(response, "renew subscription")?;
        Ok(Self::to_subscription(renewed))
    }

    fn delete_subscription(&self, id: &str) -> Result<()> {
        let response = self
            .agent
            .delete(&format!(
                "{}/subscriptions/{}",
                self.base_url,
                urlencoding::encode(id)
            ))
            .header("Authorization", &self.bearer()?)
            .call();

        match response {
            Ok(_) => Ok(()),
            // Already gone
            Err(ureq::Error::StatusCode(404)) => Ok(()),
            Err(e) => Err(self.classify(e, "delete subscription")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> GraphSettings {
        GraphSettings {
            tenant_id: "tenant".into(),
            client_id: "client".into(),
            client_secret: "secret".into(),
            ..GraphSettings::default()
        }
    }

    #[test]
    fn test_delta_url_selects_fields() {
        let client = GraphClient::new(&settings());
        let url = client.delta_url(
            &ResourceRef::new("site", "list"),
            &["Title".to_string(), "Status".to_string()],
        );
        assert!(url.starts_with("https://graph.microsoft.com/v1.0/sites/site/lists/list/items/delta?$expand="));
        assert!(url.ends_with(&*urlencoding::encode("fields($select=Title,Status)")));
    }

    #[test]
    fn test_parse_delta_page() {
        let body = r##"{
            "value": [
                {"id": "1", "eTag": "\"abc,1\"", "fields": {"@odata.etag": "\"abc,1\"", "Title": "One"}},
                {"id": "2", "deleted": {"state": "deleted"}}
            ],
            "@odata.deltaLink": "https://graph/delta?token=xyz"
        }"##;
        let page: api::DeltaResponse = serde_json::from_str(body).unwrap();
        assert_eq!(page.delta_link.as_deref(), Some("https://graph/delta?token=xyz"));
        assert!(page.next_link.is_none());

        let resource = ResourceRef::new("s", "l");
        let items: Vec<ItemRecord> = page.value.into_iter().map(|i| to_item(&resource, i)).collect();

        assert_eq!(items[0].revision, "\"abc,1\"");
        assert_eq!(items[0].fields.get("Title"), Some(&Value::from("One")));
        assert!(!items[0].fields.contains_key("@odata.etag"));
        assert_eq!(items[0].list_id, "l");
        assert!(items[1].is_tombstone());
    }

    #[test]
    fn test_parse_subscription() {
        let body = r#"{
            "id": "sub-1",
            "resource": "sites/s/lists/l",
            "notificationUrl": "https://hooks/webhook/list-notification",
            "lifecycleNotificationUrl": "https://hooks/webhook/subscription-notification",
            "expirationDateTime": "2026-01-01T00:00:00Z"
        }"#;
        let sub: api::SubscriptionResponse = serde_json::from_str(body).unwrap();
        let record = GraphClient::to_subscription(sub);
        assert_eq!(record.resource.as_str(), "sites/s/lists/l");
        assert!(record.is_addressed_to(
            "https://hooks/webhook/list-notification",
            "https://hooks/webhook/subscription-notification"
        ));
    }
}
