//! Data sources: the item provider contract and its two concrete kinds.
//!
//! - [`ArraySource`]: an array-backed source mutated by its owner
//! - [`Composition`]: merges several sources in registration order
//!
//! Sources never call consumers directly; they notify their
//! [`SubscriptionManager`], which marshals delivery onto each subscription's
//! execution context.

mod array;
mod composition;

pub use array::ArraySource;
pub use composition::{Composition, CompositionFilter};

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::subscriptions::{Subscription, SubscriptionConfig, SubscriptionManager};
use crate::types::{Record, Reference, SourceId, SourceState};
use std::collections::HashMap;
use std::sync::Arc;

/// Completion for asynchronous record resolution.
pub type RecordCompletion = Box<dyn FnOnce(Result<Record>) + Send + 'static>;

/// Shared handle to a data source.
pub type SourceRef = Arc<dyn DataSource>;

/// A provider of an ordered sequence of references.
pub trait DataSource: Send + Sync {
    fn id(&self) -> SourceId;

    /// Lifecycle state. A failed source contributes no items.
    fn state(&self) -> SourceState;

    /// Current visible items, in order.
    fn items(&self) -> Vec<Reference>;

    /// Record for a reference, resolved or not.
    fn record(&self, reference: &Reference) -> Result<Record>;

    /// Resolve a record, calling `completion` once its payload is available.
    ///
    /// Must not block. The default answers immediately with [`record`](Self::record).
    fn retrieve_record(&self, reference: &Reference, completion: RecordCompletion) {
        completion(self.record(reference));
    }

    /// Auxiliary values published alongside the items.
    fn special_items(&self) -> HashMap<String, serde_json::Value> {
        HashMap::new()
    }

    /// Subscriptions registered with this source.
    fn subscriptions(&self) -> &SubscriptionManager;
}

/// Subscribe to a data source.
///
/// The returned subscription must be terminated (or dropped) by the caller
/// once it is no longer needed.
pub fn subscribe<F>(
    source: &SourceRef,
    context: ExecutionContext,
    config: SubscriptionConfig,
    handler: F,
) -> Arc<Subscription>
where
    F: Fn(&Subscription) + Send + Sync + 'static,
{
    Subscription::start(Arc::clone(source), context, config, Arc::new(handler))
}

/// Whether two handles point at the same source.
pub fn same_source(a: &SourceRef, b: &SourceRef) -> bool {
    a.id() == b.id()
}
