//! Subscription reconciliation
//!
//! Makes the remote subscriptions match the configured lists: exactly one
//! subscription per list, addressed to this service's webhook endpoints,
//! and nothing else. Subscription ids are never stored locally; every run
//! starts from a fresh listing.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::models::{ResourceDescriptor, SubscriptionRecord, TrackedResource};
use crate::source::RemoteSource;

/// Keeps remote change-notification subscriptions in line with configuration
pub struct SubscriptionReconciler {
    source: Arc<dyn RemoteSource>,
    notification_url: String,
    lifecycle_url: String,
    expiry_window: chrono::Duration,
}

/// Comparable form of a descriptor; unparseable ones compare verbatim
fn canonical(descriptor: &ResourceDescriptor) -> String {
    descriptor
        .parse()
        .map(|r| r.descriptor().0)
        .unwrap_or_else(|_| descriptor.0.clone())
}

impl SubscriptionReconciler {
    pub fn new(
        source: Arc<dyn RemoteSource>,
        notification_url: impl Into<String>,
        lifecycle_url: impl Into<String>,
        expiry_window: chrono::Duration,
    ) -> Self {
        Self {
            source,
            notification_url: notification_url.into(),
            lifecycle_url: lifecycle_url.into(),
            expiry_window,
        }
    }

    /// Build from the webhook and subscription settings of `config`
    pub fn from_config(source: Arc<dyn RemoteSource>, config: &SyncConfig) -> Self {
        Self::new(
            source,
            config.webhook.notification_url(),
            config.webhook.lifecycle_url(),
            config.subscriptions.expiry_window(),
        )
    }

    pub fn notification_url(&self) -> &str {
        &self.notification_url
    }

    pub fn lifecycle_url(&self) -> &str {
        &self.lifecycle_url
    }

    fn next_expiry(&self) -> DateTime<Utc> {
        Utc::now() + self.expiry_window
    }

    /// Ensure one correctly addressed subscription per resource and remove
    /// every other subscription
    ///
    /// Returns the active subscriptions in the order of `resources`.
    pub fn ensure_all(&self, resources: &[TrackedResource]) -> Result<Vec<SubscriptionRecord>> {
        let existing = self.source.list_subscriptions()?;
        log::info!(
            "Reconciling {} subscriptions against {} configured lists",
            existing.len(),
            resources.len()
        );

        let configured: HashSet<String> = resources
            .iter()
            .map(|t| canonical(&t.descriptor()))
            .collect();

        let mut active = Vec::with_capacity(resources.len());
        for tracked in resources {
            let descriptor = tracked.descriptor();
            let key = canonical(&descriptor);
            let mut kept: Option<SubscriptionRecord> = None;

            for subscription in existing.iter().filter(|s| canonical(&s.resource) == key) {
                let addressed = subscription.is_addressed_to(&self.notification_url, &self.lifecycle_url);
                if addressed && kept.is_none() {
                    log::debug!("Keeping subscription {} for {}", subscription.id, descriptor);
                    kept = Some(subscription.clone());
                } else if addressed {
                    log::info!(
                        "Deleting duplicate subscription {} for {}",
                        subscription.id,
                        descriptor
                    );
                    self.source.delete_subscription(&subscription.id)?;
                } else {
                    let conflict = SyncError::SubscriptionConflict {
                        resource: descriptor.to_string(),
                    };
                    log::warn!(
                        "{}: subscription {} notifies {}, replacing it",
                        conflict,
                        subscription.id,
                        subscription.notification_url
                    );
                    self.source.delete_subscription(&subscription.id)?;
                }
            }

            let subscription = match kept {
                Some(subscription) => subscription,
                None => {
                    let created = self.source.create_subscription(
                        &descriptor,
                        &self.notification_url,
                        &self.lifecycle_url,
                        self.next_expiry(),
                    )?;
                    log::info!(
                        "Created subscription {} for {} (expires {})",
                        created.id,
                        descriptor,
                        created.expires_at
                    );
                    created
                }
            };
            active.push(subscription);
        }

        for orphan in existing
            .iter()
            .filter(|s| !configured.contains(&canonical(&s.resource)))
        {
            log::info!(
                "Deleting orphaned subscription {} for {}",
                orphan.id,
                orphan.resource
            );
            self.source.delete_subscription(&orphan.id)?;
        }

        Ok(active)
    }

    /// Push a subscription's expiry out by the configured window
    pub fn renew(&self, subscription_id: &str) -> Result<SubscriptionRecord> {
        let renewed = self
            .source
            .renew_subscription(subscription_id, self.next_expiry())?;
        log::info!(
            "Renewed subscription {} until {}",
            renewed.id,
            renewed.expires_at
        );
        Ok(renewed)
    }
}
