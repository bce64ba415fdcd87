//! Startup sequencing
//!
//! Subscriptions first, then one pass per list in configuration order.
//! Passes run on the calling thread but hold the dispatcher's slot for
//! their list, so a notification arriving meanwhile is coalesced into a
//! follow-up pass. The first error stops startup.

use super::dispatch::Dispatcher;
use super::lists::SyncStats;
use super::subscriptions::SubscriptionReconciler;
use crate::error::Result;
use crate::models::{SubscriptionRecord, TrackedResource};

/// What startup did
#[derive(Debug, Clone, Default)]
pub struct StartupSummary {
    /// Active subscriptions, in configuration order
    pub subscriptions: Vec<SubscriptionRecord>,
    /// One entry per list, in configuration order
    pub synced: Vec<SyncStats>,
}

/// Ensure subscriptions, then run the initial sync of every list
pub fn run_startup(
    subscriptions: &SubscriptionReconciler,
    dispatcher: &Dispatcher,
    resources: &[TrackedResource],
) -> Result<StartupSummary> {
    let active = subscriptions.ensure_all(resources)?;
    log::info!("{} subscriptions active", active.len());

    let mut synced = Vec::with_capacity(resources.len());
    for tracked in resources {
        log::info!("Initial sync of {} into {}", tracked.resource, tracked.schema.table);
        synced.push(dispatcher.run_now(tracked)?);
    }

    Ok(StartupSummary {
        subscriptions: active,
        synced,
    })
}
