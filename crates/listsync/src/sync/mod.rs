//! Reconciliation engine
//!
//! Provides the per-list reconciler, subscription reconciliation, the
//! notification triggers and the work dispatcher that connects them.

pub mod delta;
mod dispatch;
mod lists;
mod startup;
mod subscriptions;
mod triggers;

pub use delta::{DeltaState, SyncMode};
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use lists::{ListReconciler, SyncStats};
pub use startup::{StartupSummary, run_startup};
pub use subscriptions::SubscriptionReconciler;
pub use triggers::{ChangeOutcome, ChangeTrigger, LifecycleTrigger};
