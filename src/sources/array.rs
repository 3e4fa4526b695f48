//! Array-backed data source.

use super::{DataSource, RecordCompletion};
use crate::error::{ReconcileError, Result};
use crate::item::DataItem;
use crate::subscriptions::SubscriptionManager;
use crate::types::{Record, Reference, SourceId, SourceState};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

struct ArrayInner {
    order: Vec<Reference>,
    records: HashMap<Reference, Record>,
    state: SourceState,
    special_items: HashMap<String, serde_json::Value>,
}

impl ArrayInner {
    fn remove(&mut self, reference: &Reference) -> Option<Record> {
        let record = self.records.remove(reference)?;
        self.order.retain(|existing| existing != reference);
        Some(record)
    }
}

/// Retrievals settled by a mutation, run once the locks are released.
type Settled = Vec<(RecordCompletion, Result<Record>)>;

/// A data source backed by an ordered list of records.
///
/// Every mutation notifies subscribers after the internal lock is released.
/// Lock order is `inner`, then `waiters`.
pub struct ArraySource {
    id: SourceId,
    inner: RwLock<ArrayInner>,
    /// Completions waiting for a payload to arrive.
    waiters: Mutex<HashMap<Reference, Vec<RecordCompletion>>>,
    subscriptions: SubscriptionManager,
}

impl ArraySource {
    /// Source with unresolved records for the given references.
    pub fn new<I, R>(references: I) -> Arc<Self>
    where
        I: IntoIterator<Item = R>,
        R: Into<Reference>,
    {
        Self::with_records(
            references
                .into_iter()
                .map(|reference| Record::from(reference.into())),
        )
    }

    /// Source holding the given records, in order. Later duplicates replace
    /// earlier ones in place.
    pub fn with_records<I>(records: I) -> Arc<Self>
    where
        I: IntoIterator<Item = Record>,
    {
        let mut inner = ArrayInner {
            order: Vec::new(),
            records: HashMap::new(),
            state: SourceState::Idle,
            special_items: HashMap::new(),
        };

        for record in records {
            if !inner.records.contains_key(&record.reference) {
                inner.order.push(record.reference.clone());
            }
            inner.records.insert(record.reference.clone(), record);
        }

        Arc::new(Self {
            id: SourceId::next(),
            inner: RwLock::new(inner),
            waiters: Mutex::new(HashMap::new()),
            subscriptions: SubscriptionManager::new(),
        })
    }

    /// Take the waiters whose record is now resolved or gone. Called with
    /// `inner` locked, right after a mutation.
    fn settle_waiters(&self, inner: &ArrayInner) -> Settled {
        let mut waiters = self.waiters.lock();
        if waiters.is_empty() {
            return Vec::new();
        }

        let ready: Vec<Reference> = waiters
            .keys()
            .filter(|reference| {
                inner
                    .records
                    .get(*reference)
                    .map_or(true, |record| record.is_resolved())
            })
            .cloned()
            .collect();

        let mut settled = Vec::new();
        for reference in ready {
            let result = inner
                .records
                .get(&reference)
                .cloned()
                .ok_or_else(|| ReconcileError::RecordNotFound(reference.clone()));
            for waiter in waiters.remove(&reference).unwrap_or_default() {
                settled.push((waiter, result.clone()));
            }
        }
        settled
    }

    fn complete(&self, settled: Settled) {
        if !settled.is_empty() {
            tracing::trace!(source = ?self.id, completed = settled.len(), "pending retrievals settled");
        }
        for (waiter, result) in settled {
            waiter(result);
        }
    }

    /// Number of retrievals still waiting for a payload.
    pub fn pending_retrievals(&self) -> usize {
        self.waiters.lock().values().map(Vec::len).sum()
    }

    /// Replace the whole content.
    ///
    /// References present before and after whose version or resolution
    /// changed are reported as updated. Pending retrievals complete with the
    /// new record once it is resolved, or fail if it is gone.
    pub fn set_records<I>(&self, records: I)
    where
        I: IntoIterator<Item = Record>,
    {
        let (updated, settled) = {
            let mut inner = self.inner.write();
            let mut order = Vec::new();
            let mut next: HashMap<Reference, Record> = HashMap::new();

            for record in records {
                if !next.contains_key(&record.reference) {
                    order.push(record.reference.clone());
                }
                next.insert(record.reference.clone(), record);
            }

            let updated: Vec<Reference> = order
                .iter()
                .filter(|reference| {
                    match (inner.records.get(*reference), next.get(*reference)) {
                        (Some(old), Some(new)) => {
                            old.version != new.version || old.is_resolved() != new.is_resolved()
                        }
                        _ => false,
                    }
                })
                .cloned()
                .collect();

            inner.order = order;
            inner.records = next;
            (updated, self.settle_waiters(&inner))
        };

        self.complete(settled);
        self.subscriptions.notify(&updated);
    }

    /// Append a record. An existing record with the same reference is
    /// replaced in place and reported as updated.
    pub fn push(&self, record: impl Into<Record>) {
        let record = record.into();
        let (updated, settled) = {
            let mut inner = self.inner.write();
            let reference = record.reference.clone();
            let updated = if inner.records.insert(reference.clone(), record).is_some() {
                vec![reference]
            } else {
                inner.order.push(reference);
                Vec::new()
            };
            (updated, self.settle_waiters(&inner))
        };

        self.complete(settled);
        self.subscriptions.notify(&updated);
    }

    /// Insert a record at `index` (clamped). An existing record with the same
    /// reference is moved.
    pub fn insert(&self, index: usize, record: impl Into<Record>) {
        let record = record.into();
        let settled = {
            let mut inner = self.inner.write();
            inner.remove(&record.reference);
            let index = index.min(inner.order.len());
            inner.order.insert(index, record.reference.clone());
            inner.records.insert(record.reference.clone(), record);
            self.settle_waiters(&inner)
        };

        self.complete(settled);
        self.subscriptions.notify(&[]);
    }

    /// Remove a record, returning it if it was present. Pending retrievals
    /// of it fail with `RecordNotFound`.
    pub fn remove(&self, reference: &Reference) -> Option<Record> {
        let (removed, settled) = {
            let mut inner = self.inner.write();
            let removed = inner.remove(reference);
            (removed, self.settle_waiters(&inner))
        };

        self.complete(settled);
        if removed.is_some() {
            self.subscriptions.notify(&[]);
        }
        removed
    }

    /// Deliver a late payload. Pending retrievals complete and subscribers
    /// see the reference as updated.
    pub fn resolve(&self, reference: &Reference, item: Arc<dyn DataItem>) -> Result<()> {
        let (record, waiters) = {
            let mut inner = self.inner.write();
            let record = inner
                .records
                .get_mut(reference)
                .ok_or_else(|| ReconcileError::RecordNotFound(reference.clone()))?;

            record.item_type = item.item_type();
            record.version = item.version().unwrap_or(record.version + 1);
            record.item = Some(item);
            let record = record.clone();

            let waiters = self.waiters.lock().remove(reference).unwrap_or_default();
            (record, waiters)
        };

        tracing::trace!(source = ?self.id, reference = %reference, waiters = waiters.len(), "record resolved");
        for waiter in waiters {
            waiter(Ok(record.clone()));
        }

        self.subscriptions.notify(std::slice::from_ref(reference));
        Ok(())
    }

    /// Report references as changed in place.
    pub fn mark_updated<I>(&self, references: I)
    where
        I: IntoIterator<Item = Reference>,
    {
        let updated: Vec<Reference> = {
            let inner = self.inner.read();
            references
                .into_iter()
                .filter(|reference| inner.records.contains_key(reference))
                .collect()
        };

        if !updated.is_empty() {
            self.subscriptions.notify(&updated);
        }
    }

    pub fn set_state(&self, state: SourceState) {
        {
            let mut inner = self.inner.write();
            if inner.state == state {
                return;
            }
            inner.state = state;
        }
        self.subscriptions.notify(&[]);
    }

    /// Mark the source failed. It keeps its records but contributes no items
    /// until its state is set back.
    pub fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!(source = ?self.id, %reason, "data source failed");
        self.set_state(SourceState::Failed { reason });
    }

    pub fn set_special_item(&self, key: impl Into<String>, value: serde_json::Value) {
        self.inner.write().special_items.insert(key.into(), value);
        self.subscriptions.notify(&[]);
    }

    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ArraySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("ArraySource")
            .field("id", &self.id)
            .field("items", &inner.order.len())
            .field("state", &inner.state)
            .field("pending_retrievals", &self.pending_retrievals())
            .finish()
    }
}

impl DataSource for ArraySource {
    fn id(&self) -> SourceId {
        self.id
    }

    fn state(&self) -> SourceState {
        self.inner.read().state.clone()
    }

    fn items(&self) -> Vec<Reference> {
        let inner = self.inner.read();
        if inner.state.is_failed() {
            return Vec::new();
        }
        inner.order.clone()
    }

    fn record(&self, reference: &Reference) -> Result<Record> {
        let inner = self.inner.read();
        if let SourceState::Failed { reason } = &inner.state {
            return Err(ReconcileError::SourceFailed {
                source_id: self.id,
                reason: reason.clone(),
            });
        }
        inner
            .records
            .get(reference)
            .cloned()
            .ok_or_else(|| ReconcileError::RecordNotFound(reference.clone()))
    }

    fn retrieve_record(&self, reference: &Reference, completion: RecordCompletion) {
        {
            let inner = self.inner.read();
            let waiting = !inner.state.is_failed()
                && inner
                    .records
                    .get(reference)
                    .is_some_and(|record| !record.is_resolved());

            if waiting {
                self.waiters
                    .lock()
                    .entry(reference.clone())
                    .or_default()
                    .push(completion);
                return;
            }
        }

        completion(self.record(reference));
    }

    fn special_items(&self) -> HashMap<String, serde_json::Value> {
        self.inner.read().special_items.clone()
    }

    fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }
}
