//! Per-source registry of subscriptions.

use crate::types::Reference;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};

use super::types::{Subscription, SubscriptionId};

/// Tracks the subscriptions of one data source and fans out change
/// notifications to them.
///
/// Subscriptions are held weakly; the consumer owns them. Dead entries are
/// pruned on the next notification or count.
pub struct SubscriptionManager {
    subscriptions: RwLock<Vec<(SubscriptionId, Weak<Subscription>)>>,
}

impl SubscriptionManager {
    /// Create a new subscription manager.
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn register(&self, subscription: &Arc<Subscription>) {
        self.subscriptions
            .write()
            .push((subscription.id(), Arc::downgrade(subscription)));
    }

    /// Remove a subscription. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscriptions.write().retain(|(sub_id, _)| *sub_id != id);
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        let mut subs = self.subscriptions.write();
        subs.retain(|(_, sub)| sub.strong_count() > 0);
        subs.len()
    }

    /// Notify every live subscription that the source changed.
    ///
    /// `updated` lists references whose content changed in place. No lock
    /// is held while subscriptions run their handlers.
    pub fn notify(&self, updated: &[Reference]) {
        let live: Vec<Arc<Subscription>> = {
            let subs = self.subscriptions.read();
            subs.iter().filter_map(|(_, sub)| sub.upgrade()).collect()
        };

        for subscription in &live {
            subscription.notify(updated);
        }
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("registered", &self.subscriptions.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::context::{ExecutionContext, UpdateContext};
    use crate::sources::{subscribe, ArraySource, DataSource, SourceRef};
    use crate::subscriptions::SubscriptionConfig;
    use crate::types::Reference;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn refs(items: &[&str]) -> HashSet<Reference> {
        items.iter().map(|item| Reference::new(item)).collect()
    }

    fn counting(
        source: &SourceRef,
        context: ExecutionContext,
        config: SubscriptionConfig,
    ) -> (Arc<crate::subscriptions::Subscription>, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let sub = subscribe(source, context, config, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (sub, count)
    }

    #[test]
    fn test_subscribe_unsubscribe() {
        let array = ArraySource::new(["a", "b"]);
        let source: SourceRef = array.clone();

        let (sub, _) = counting(&source, ExecutionContext::Immediate, SubscriptionConfig::quiet());
        assert_eq!(array.subscriptions().subscription_count(), 1);

        sub.terminate();
        assert_eq!(array.subscriptions().subscription_count(), 0);
    }

    #[test]
    fn test_initial_update_delivered() {
        let source: SourceRef = ArraySource::new(["a"]);

        let (_sub, count) =
            counting(&source, ExecutionContext::Immediate, SubscriptionConfig::default());
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let (_quiet, quiet_count) =
            counting(&source, ExecutionContext::Immediate, SubscriptionConfig::quiet());
        assert_eq!(quiet_count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_terminate_is_idempotent() {
        let source: SourceRef = ArraySource::new(["a"]);
        let (sub, _) = counting(&source, ExecutionContext::Immediate, SubscriptionConfig::quiet());

        sub.terminate();
        sub.terminate();
        assert!(sub.is_terminated());
        assert_eq!(source.subscriptions().subscription_count(), 0);
    }

    #[test]
    fn test_in_flight_delivery_dropped_after_terminate() {
        let context = UpdateContext::new();
        let array = ArraySource::new(["a"]);
        let source: SourceRef = array.clone();

        let (sub, count) = counting(
            &source,
            ExecutionContext::Update(context.clone()),
            SubscriptionConfig::quiet(),
        );

        array.push("b");
        assert_eq!(context.pending_jobs(), 1);

        sub.terminate();
        context.run_pending();
        assert_eq!(count.load(Ordering::SeqCst), 0);

        // Later mutations do not even schedule work
        array.push("c");
        assert_eq!(context.pending_jobs(), 0);
    }

    #[test]
    fn test_notifications_coalesce_while_pending() {
        let context = UpdateContext::new();
        let array = ArraySource::new(Vec::<&str>::new());
        let source: SourceRef = array.clone();

        let (sub, count) = counting(
            &source,
            ExecutionContext::Update(context.clone()),
            SubscriptionConfig::quiet(),
        );

        array.push("a");
        array.push("b");
        array.push("c");
        context.run_pending();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        let snapshot = sub.snapshot_resetting_change_tracking(true);
        assert_eq!(snapshot.added, Some(refs(&["a", "b", "c"])));
    }

    #[test]
    fn test_difference_tracking_and_reset() {
        let array = ArraySource::new(["a", "b", "c"]);
        let source: SourceRef = array.clone();
        let (sub, _) = counting(&source, ExecutionContext::Immediate, SubscriptionConfig::quiet());

        array.remove(&Reference::new("b"));
        array.push("d");
        array.mark_updated([Reference::new("a"), Reference::new("d")]);

        let snapshot = sub.snapshot_resetting_change_tracking(false);
        assert_eq!(snapshot.items, vec![Reference::new("a"), Reference::new("c"), Reference::new("d")]);
        assert_eq!(snapshot.added, Some(refs(&["d"])));
        assert_eq!(snapshot.removed, Some(refs(&["b"])));
        // Newly added items are not reported as updated
        assert_eq!(snapshot.updated, Some(refs(&["a"])));

        // Without reset the accumulators survive
        let again = sub.snapshot_resetting_change_tracking(true);
        assert_eq!(again, snapshot);

        let after_reset = sub.snapshot_resetting_change_tracking(true);
        assert_eq!(after_reset.items, snapshot.items);
        assert!(!after_reset.has_changes());
    }

    #[test]
    fn test_untracked_snapshot_has_no_sets() {
        let source: SourceRef = ArraySource::new(["a"]);
        let config = SubscriptionConfig {
            track_differences: false,
            perform_initial_update: false,
        };
        let (sub, _) = counting(&source, ExecutionContext::Immediate, config);

        let snapshot = sub.snapshot_resetting_change_tracking(true);
        assert_eq!(snapshot.items, vec![Reference::new("a")]);
        assert!(snapshot.added.is_none());
        assert!(snapshot.removed.is_none());
        assert!(snapshot.updated.is_none());
    }

    #[test]
    fn test_dropping_handle_releases_registration() {
        let array = ArraySource::new(["a"]);
        let source: SourceRef = array.clone();

        let captured = Arc::new(Mutex::new(()));
        let weak = Arc::downgrade(&captured);
        let sub = subscribe(&source, ExecutionContext::Immediate, SubscriptionConfig::quiet(), {
            let captured = Arc::clone(&captured);
            move |_| {
                let _guard = captured.lock();
            }
        });
        drop(captured);

        assert!(weak.upgrade().is_some());
        drop(sub);
        assert!(weak.upgrade().is_none());
        assert_eq!(array.subscriptions().subscription_count(), 0);
    }
}
