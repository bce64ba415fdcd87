//! Per-list single-flight work queue
//!
//! Notification-driven passes run on the tokio blocking pool. At most one
//! pass per list runs at a time; triggers that arrive while a pass is
//! running collapse into a single follow-up pass. Startup passes go through
//! [`Dispatcher::run_now`], which takes the same slot on the calling thread.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::lists::{ListReconciler, SyncStats};
use crate::error::Result;
use crate::models::{ResourceRef, TrackedResource};

/// What [`Dispatcher::submit`] did with a trigger
#[derive(Debug)]
pub enum DispatchOutcome {
    /// A worker was started; it finishes once no re-run is pending
    Started(JoinHandle<()>),
    /// A pass was already running; it will run once more afterwards
    Coalesced,
}

impl DispatchOutcome {
    pub fn is_started(&self) -> bool {
        matches!(self, DispatchOutcome::Started(_))
    }
}

/// Running lists mapped to whether another pass has been requested
#[derive(Default)]
struct Slots {
    running: Mutex<HashMap<ResourceRef, bool>>,
    released: Condvar,
}

impl Slots {
    fn lock(&self) -> MutexGuard<'_, HashMap<ResourceRef, bool>> {
        // The map stays consistent even if a holder panicked
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until no pass for `resource` is running, then claim it
    fn acquire(&self, resource: &ResourceRef) {
        let mut running = self.lock();
        while running.contains_key(resource) {
            running = self
                .released
                .wait(running)
                .unwrap_or_else(PoisonError::into_inner);
        }
        running.insert(resource.clone(), false);
    }

    /// Finish a pass: true if a re-run was requested meanwhile, which keeps
    /// the slot claimed; otherwise the slot is released
    fn finish(&self, resource: &ResourceRef) -> bool {
        let mut running = self.lock();
        if running.get(resource).copied().unwrap_or(false) {
            running.insert(resource.clone(), false);
            return true;
        }
        running.remove(resource);
        drop(running);
        self.released.notify_all();
        false
    }
}

/// Schedules reconciliation passes, one per list at a time
pub struct Dispatcher {
    reconciler: Arc<ListReconciler>,
    runtime: Handle,
    slots: Arc<Slots>,
}

impl Dispatcher {
    pub fn new(reconciler: Arc<ListReconciler>, runtime: Handle) -> Self {
        Self {
            reconciler,
            runtime,
            slots: Arc::new(Slots::default()),
        }
    }

    /// Whether a pass for `resource` is running or queued
    pub fn is_busy(&self, resource: &ResourceRef) -> bool {
        self.slots.lock().contains_key(resource)
    }

    /// Request a pass for `tracked`
    pub fn submit(&self, tracked: &TrackedResource) -> DispatchOutcome {
        {
            let mut running = self.slots.lock();
            if let Some(rerun) = running.get_mut(&tracked.resource) {
                *rerun = true;
                log::debug!("Pass for {} already running, queued a re-run", tracked.resource);
                return DispatchOutcome::Coalesced;
            }
            running.insert(tracked.resource.clone(), false);
        }
        DispatchOutcome::Started(self.spawn_worker(tracked))
    }

    /// Run one pass for `tracked` on the calling thread and return its result
    ///
    /// Waits for a running pass of the same list to finish first. Triggers
    /// that arrive meanwhile are coalesced and run on the blocking pool
    /// afterwards. Must not be called from an async context.
    pub fn run_now(&self, tracked: &TrackedResource) -> Result<SyncStats> {
        self.slots.acquire(&tracked.resource);
        let result = self.reconciler.reconcile(tracked);
        if self.slots.finish(&tracked.resource) {
            log::debug!("Re-running pass for {} in the background", tracked.resource);
            drop(self.spawn_worker(tracked));
        }
        result
    }

    /// Start a worker for a list whose slot is already claimed
    fn spawn_worker(&self, tracked: &TrackedResource) -> JoinHandle<()> {
        let reconciler = self.reconciler.clone();
        let slots = self.slots.clone();
        let tracked = tracked.clone();
        self.runtime
            .spawn_blocking(move || run_worker(&reconciler, &slots, &tracked))
    }
}

fn run_worker(reconciler: &ListReconciler, slots: &Slots, tracked: &TrackedResource) {
    let resource = &tracked.resource;
    loop {
        if let Err(e) = reconciler.reconcile(tracked) {
            if e.is_fatal() {
                log::error!(
                    "Reconciliation of {} failed, operator action required: {}",
                    resource,
                    e
                );
            } else {
                log::warn!("Reconciliation of {} failed: {}", resource, e);
            }
        }

        if !slots.finish(resource) {
            break;
        }
        log::debug!("Re-running pass for {}", resource);
    }
}
