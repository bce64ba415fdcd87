//! Remote change-notification subscription

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ResourceDescriptor;

/// A subscription registered on the remote source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub id: String,
    pub resource: ResourceDescriptor,
    pub notification_url: String,
    pub lifecycle_url: String,
    pub expires_at: DateTime<Utc>,
}

impl SubscriptionRecord {
    /// Whether both callback URLs point at the given endpoints
    pub fn is_addressed_to(&self, notification_url: &str, lifecycle_url: &str) -> bool {
        self.notification_url == notification_url && self.lifecycle_url == lifecycle_url
    }
}
