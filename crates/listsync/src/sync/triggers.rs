//! Notification triggers
//!
//! The change trigger turns a batch of change notifications into
//! dispatched reconciliation passes; the lifecycle trigger renews the
//! subscriptions named in a lifecycle batch.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::dispatch::{DispatchOutcome, Dispatcher};
use super::subscriptions::SubscriptionReconciler;
use crate::error::{Result, SyncError};
use crate::models::{
    ChangeNotification, LifecycleNotification, ResourceRef, SubscriptionRecord, TrackedResource,
};

/// What a change batch turned into
#[derive(Debug, Default)]
pub struct ChangeOutcome {
    /// One entry per distinct configured list, in first-seen order
    pub dispatched: Vec<(ResourceRef, DispatchOutcome)>,
    /// Notifications that matched no configured list
    pub rejected: Vec<SyncError>,
}

/// Dispatches reconciliation for lists named in change notifications
pub struct ChangeTrigger {
    resources: HashMap<ResourceRef, TrackedResource>,
    dispatcher: Arc<Dispatcher>,
}

impl ChangeTrigger {
    pub fn new(resources: &[TrackedResource], dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            resources: resources
                .iter()
                .map(|t| (t.resource.clone(), t.clone()))
                .collect(),
            dispatcher,
        }
    }

    /// Resolve each notification on its own
    ///
    /// Matched lists come back deduplicated in first-seen order; every
    /// notification that names no configured list yields an error.
    pub fn validate(
        &self,
        notifications: &[ChangeNotification],
    ) -> (Vec<&TrackedResource>, Vec<SyncError>) {
        let mut seen = HashSet::new();
        let mut matched = Vec::new();
        let mut rejected = Vec::new();
        for notification in notifications {
            let tracked = notification.resource.parse().and_then(|resource| {
                self.resources
                    .get(&resource)
                    .ok_or_else(|| SyncError::UnknownResource {
                        descriptor: notification.resource.to_string(),
                    })
            });
            match tracked {
                Ok(tracked) => {
                    if seen.insert(&tracked.resource) {
                        matched.push(tracked);
                    }
                }
                Err(e) => rejected.push(e),
            }
        }
        (matched, rejected)
    }

    /// Hand each configured list in the batch to the dispatcher
    ///
    /// Unmatched notifications are skipped. The batch fails only when
    /// nothing in it matched. Returns as soon as the passes are scheduled.
    pub fn handle(&self, notifications: &[ChangeNotification]) -> Result<ChangeOutcome> {
        let (matched, mut rejected) = self.validate(notifications);
        if matched.is_empty() && !rejected.is_empty() {
            return Err(rejected.swap_remove(0));
        }
        for e in &rejected {
            log::warn!("Skipping change notification: {}", e);
        }

        let dispatched = matched
            .into_iter()
            .map(|tracked| {
                let outcome = self.dispatcher.submit(tracked);
                log::info!(
                    "Change notification for {}: {}",
                    tracked.resource,
                    if outcome.is_started() { "sync started" } else { "sync queued" }
                );
                (tracked.resource.clone(), outcome)
            })
            .collect();
        Ok(ChangeOutcome {
            dispatched,
            rejected,
        })
    }

    /// Parse a raw notification body and handle it
    pub fn handle_body(&self, body: &[u8]) -> Result<ChangeOutcome> {
        let notifications = ChangeNotification::parse_batch(body)?;
        self.handle(&notifications)
    }
}

/// Renews subscriptions named in lifecycle notifications
pub struct LifecycleTrigger {
    subscriptions: Arc<SubscriptionReconciler>,
}

impl LifecycleTrigger {
    pub fn new(subscriptions: Arc<SubscriptionReconciler>) -> Self {
        Self { subscriptions }
    }

    /// Renew each distinct subscription in the batch
    ///
    /// Every renewal is attempted; the first failure is returned.
    pub fn handle(&self, notifications: &[LifecycleNotification]) -> Result<Vec<SubscriptionRecord>> {
        let mut seen = HashSet::new();
        let mut renewed = Vec::new();
        let mut first_error = None;

        for notification in notifications {
            if !seen.insert(notification.subscription_id.as_str()) {
                continue;
            }
            log::info!(
                "Lifecycle event {} for subscription {}",
                notification.lifecycle_event.as_deref().unwrap_or("(none)"),
                notification.subscription_id
            );
            match self.subscriptions.renew(&notification.subscription_id) {
                Ok(record) => renewed.push(record),
                Err(e) => {
                    log::error!(
                        "Failed to renew subscription {}: {}",
                        notification.subscription_id,
                        e
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(renewed),
        }
    }

    /// Parse a raw lifecycle body and handle it
    pub fn handle_body(&self, body: &[u8]) -> Result<Vec<SubscriptionRecord>> {
        let notifications = LifecycleNotification::parse_batch(body)?;
        self.handle(&notifications)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ResourceDescriptor, ResourceSchema};
    use crate::source::InMemorySource;
    use crate::storage::InMemoryListStore;
    use crate::sync::ListReconciler;
    use chrono::Utc;
    use tokio::runtime::Handle;

    fn change(resource: &str) -> ChangeNotification {
        ChangeNotification {
            resource: ResourceDescriptor::from(resource),
            change_type: "updated".to_string(),
            subscription_id: None,
        }
    }

    fn trigger(source: Arc<InMemorySource>) -> ChangeTrigger {
        let store = Arc::new(InMemoryListStore::new());
        let reconciler = Arc::new(ListReconciler::new(source, store));
        let dispatcher = Arc::new(Dispatcher::new(reconciler, Handle::current()));
        let resources = vec![
            TrackedResource::new(ResourceRef::new("s", "a"), ResourceSchema::new("a", vec![])),
            TrackedResource::new(ResourceRef::new("s", "b"), ResourceSchema::new("b", vec![])),
        ];
        ChangeTrigger::new(&resources, dispatcher)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_batch_with_no_configured_list_is_rejected() {
        let source = Arc::new(InMemorySource::new());
        let trigger = trigger(source.clone());

        let err = trigger.handle(&[change("sites/s/lists/zzz")]).unwrap_err();
        assert!(matches!(err, SyncError::UnknownResource { .. }));

        let err = trigger.handle(&[change("drives/x")]).unwrap_err();
        assert!(matches!(err, SyncError::MalformedNotification { .. }));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(source.fetch_log().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unknown_entries_do_not_block_configured_lists() {
        let source = Arc::new(InMemorySource::new());
        source.put_list(&ResourceRef::new("s", "a"), "v1", "a", "A");
        let trigger = trigger(source.clone());

        let outcome = trigger
            .handle(&[
                change("sites/s/lists/retired"),
                change("sites/s/lists/a"),
                change("drives/x"),
            ])
            .unwrap();
        assert_eq!(outcome.rejected.len(), 2);
        assert!(matches!(outcome.rejected[0], SyncError::UnknownResource { .. }));
        assert!(matches!(outcome.rejected[1], SyncError::MalformedNotification { .. }));
        assert_eq!(outcome.dispatched.len(), 1);

        for (resource, outcome) in outcome.dispatched {
            assert_eq!(resource, ResourceRef::new("s", "a"));
            if let DispatchOutcome::Started(handle) = outcome {
                handle.await.unwrap();
            }
        }
        assert_eq!(source.fetch_log().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dispatches_each_list_once() {
        let source = Arc::new(InMemorySource::new());
        let trigger = trigger(source);

        let outcome = trigger
            .handle(&[
                change("sites/s/lists/a"),
                change("/sites/s/lists/a"),
                change("sites/s/lists/b"),
            ])
            .unwrap();
        assert!(outcome.rejected.is_empty());
        let resources: Vec<String> = outcome.dispatched.iter().map(|(r, _)| r.to_string()).collect();
        assert_eq!(resources, vec!["s/a", "s/b"]);

        for (_, outcome) in outcome.dispatched {
            if let DispatchOutcome::Started(handle) = outcome {
                handle.await.unwrap();
            }
        }
    }

    #[test]
    fn test_lifecycle_renews_each_subscription() {
        let source = Arc::new(InMemorySource::new());
        for id in ["s1", "s2"] {
            source.insert_subscription(SubscriptionRecord {
                id: id.to_string(),
                resource: ResourceDescriptor::from("sites/s/lists/a"),
                notification_url: String::new(),
                lifecycle_url: String::new(),
                expires_at: Utc::now(),
            });
        }
        let subscriptions = Arc::new(SubscriptionReconciler::new(
            source.clone(),
            "n",
            "l",
            chrono::Duration::hours(48),
        ));
        let trigger = LifecycleTrigger::new(subscriptions);

        let body = br#"{"value": [
            {"subscriptionId": "s1", "lifecycleEvent": "reauthorizationRequired"},
            {"subscriptionId": "s2", "lifecycleEvent": "reauthorizationRequired"},
            {"subscriptionId": "s1", "lifecycleEvent": "reauthorizationRequired"}
        ]}"#;
        let renewed = trigger.handle_body(body).unwrap();
        assert_eq!(renewed.len(), 2);
        assert_eq!(source.subscription_calls(), (0, 0, 2));

        let body = br#"{"value": [{"subscriptionId": "gone"}, {"subscriptionId": "s1"}]}"#;
        assert!(trigger.handle_body(body).is_err());
        assert_eq!(source.subscription_calls(), (0, 0, 4));
    }
}
