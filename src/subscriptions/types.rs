//! Subscription types: configuration, snapshots and the live subscription.

use crate::context::ExecutionContext;
use crate::sources::SourceRef;
use crate::types::Reference;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Configuration for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    /// Accumulate added/removed/updated sets between resets.
    /// Default: true
    pub track_differences: bool,

    /// Deliver one notification right after subscribing.
    /// Default: true
    pub perform_initial_update: bool,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            track_differences: true,
            perform_initial_update: true,
        }
    }
}

impl SubscriptionConfig {
    /// Track differences but skip the initial notification.
    pub fn quiet() -> Self {
        Self {
            perform_initial_update: false,
            ..Default::default()
        }
    }
}

/// Point-in-time view of a data source.
///
/// The difference sets are `None` when the subscription does not track
/// differences.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub items: Vec<Reference>,
    pub added: Option<HashSet<Reference>>,
    pub removed: Option<HashSet<Reference>>,
    pub updated: Option<HashSet<Reference>>,
    pub special_items: HashMap<String, serde_json::Value>,
}

impl Snapshot {
    /// True if any difference set is non-empty.
    pub fn has_changes(&self) -> bool {
        [&self.added, &self.removed, &self.updated]
            .iter()
            .any(|set| set.as_ref().is_some_and(|set| !set.is_empty()))
    }
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

impl SubscriptionId {
    pub(crate) fn next() -> Self {
        SubscriptionId(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Handler invoked on every delivered notification.
pub type UpdateHandler = Arc<dyn Fn(&Subscription) + Send + Sync>;

struct Tracking {
    /// Item set at the last reset.
    baseline: HashSet<Reference>,
    /// References reported updated since the last reset.
    updated: HashSet<Reference>,
    /// A delivery is scheduled but has not run yet.
    delivery_pending: bool,
}

/// A live cursor into one data source.
///
/// Notifications are marshaled onto the subscription's execution context.
/// Once terminated, the handler is released and never fires again, even for
/// deliveries that were already scheduled.
pub struct Subscription {
    id: SubscriptionId,
    source: SourceRef,
    config: SubscriptionConfig,
    context: ExecutionContext,
    handler: Mutex<Option<UpdateHandler>>,
    tracking: Mutex<Tracking>,
    terminated: AtomicBool,
    this: Weak<Subscription>,
}

impl Subscription {
    /// Subscribe `handler` to `source` and register with its manager.
    pub(crate) fn start(
        source: SourceRef,
        context: ExecutionContext,
        config: SubscriptionConfig,
        handler: UpdateHandler,
    ) -> Arc<Subscription> {
        let baseline = if config.track_differences {
            source.items().into_iter().collect()
        } else {
            HashSet::new()
        };

        let subscription = Arc::new_cyclic(|this| Subscription {
            id: SubscriptionId::next(),
            source: Arc::clone(&source),
            config,
            context,
            handler: Mutex::new(Some(handler)),
            tracking: Mutex::new(Tracking {
                baseline,
                updated: HashSet::new(),
                delivery_pending: false,
            }),
            terminated: AtomicBool::new(false),
            this: this.clone(),
        });

        source.subscriptions().register(&subscription);
        tracing::trace!(subscription = subscription.id.0, source = ?source.id(), "subscribed");

        if config.perform_initial_update {
            subscription.schedule_delivery();
        }

        subscription
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn source(&self) -> &SourceRef {
        &self.source
    }

    pub fn config(&self) -> SubscriptionConfig {
        self.config
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Take a snapshot of the source. With `reset`, the difference sets
    /// start over from this snapshot.
    pub fn snapshot_resetting_change_tracking(&self, reset: bool) -> Snapshot {
        let items = self.source.items();
        let special_items = self.source.special_items();

        if !self.config.track_differences {
            return Snapshot {
                items,
                special_items,
                ..Default::default()
            };
        }

        let current: HashSet<Reference> = items.iter().cloned().collect();
        let mut tracking = self.tracking.lock();

        let added: HashSet<Reference> = current.difference(&tracking.baseline).cloned().collect();
        let removed: HashSet<Reference> =
            tracking.baseline.difference(&current).cloned().collect();
        let updated: HashSet<Reference> = tracking
            .updated
            .iter()
            .filter(|reference| current.contains(*reference) && !added.contains(*reference))
            .cloned()
            .collect();

        if reset {
            tracking.baseline = current;
            tracking.updated.clear();
        }

        Snapshot {
            items,
            added: Some(added),
            removed: Some(removed),
            updated: Some(updated),
            special_items,
        }
    }

    /// Stop receiving notifications. Safe to call any number of times.
    pub fn terminate(&self) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }

        // Release the handler so nothing it captured outlives us
        let handler = self.handler.lock().take();
        drop(handler);

        self.source.subscriptions().unsubscribe(self.id);
        tracing::trace!(subscription = self.id.0, source = ?self.source.id(), "terminated");
    }

    /// Called by the source's manager when the source changed.
    pub(crate) fn notify(&self, updated: &[Reference]) {
        if self.is_terminated() {
            return;
        }

        {
            let mut tracking = self.tracking.lock();
            if self.config.track_differences {
                tracking.updated.extend(updated.iter().cloned());
            }
            if tracking.delivery_pending {
                // Folds into the delivery already scheduled
                return;
            }
            tracking.delivery_pending = true;
        }

        self.dispatch_delivery();
    }

    fn schedule_delivery(&self) {
        {
            let mut tracking = self.tracking.lock();
            if tracking.delivery_pending {
                return;
            }
            tracking.delivery_pending = true;
        }
        self.dispatch_delivery();
    }

    fn dispatch_delivery(&self) {
        let this = self.this.clone();
        self.context.execute(move || {
            if let Some(subscription) = this.upgrade() {
                subscription.deliver();
            }
        });
    }

    fn deliver(&self) {
        self.tracking.lock().delivery_pending = false;

        if self.is_terminated() {
            tracing::trace!(subscription = self.id.0, "dropping delivery after termination");
            return;
        }

        let handler = self.handler.lock().clone();
        if let Some(handler) = handler {
            handler(self);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.terminate();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("source", &self.source.id())
            .field("config", &self.config)
            .field("terminated", &self.is_terminated())
            .finish()
    }
}
