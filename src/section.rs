//! Sections: one data source bound into the rendering model, with
//! on-demand expansion of hierarchical items.
//!
//! Expanding an item subscribes to a child data source obtained from the
//! item's record. The child's items are merged under the parent on the next
//! update cycle. Collapsing tears down the item's child source and, first,
//! every expanded descendant's.

use crate::context::{ExecutionContext, UpdateContext};
use crate::error::{ReconcileError, Result};
use crate::model::{place_items, SectionSnapshot, Wrapper};
use crate::registry::CellStyle;
use crate::sources::{subscribe, SourceRef};
use crate::subscriptions::{Snapshot, Subscription, SubscriptionConfig};
use crate::types::{ItemRef, SectionId};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Requests an update cycle from the owning controller. The flag asks for
/// animation.
pub(crate) type UpdateTrigger = Arc<dyn Fn(bool) + Send + Sync>;

struct Attachment {
    context: UpdateContext,
    trigger: UpdateTrigger,
}

struct ChildSource {
    source: SourceRef,
    subscription: Arc<Subscription>,
    /// Expanded item under which the expanded item appears; `None` at the
    /// root level.
    parent: Option<ItemRef>,
    /// Children have been merged into the model at least once.
    merged: bool,
}

/// Expansion state of one item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpansionState {
    Collapsed,
    /// Child source subscribed, children not merged yet.
    Expanding,
    Expanded,
}

/// Counters for anchored insertion across update cycles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct InsertionMetrics {
    pub cycles: u64,
    pub passes: u64,
    pub placed: u64,
    /// Items that found no anchor and will be retried.
    pub deferred: u64,
    /// Items dropped from a cycle after exhausting their retries.
    pub abandoned: u64,
}

/// Result of composing a section for one update cycle.
#[derive(Debug, Default)]
pub(crate) struct Composed {
    pub snapshot: SectionSnapshot,
    pub reconfigured: Vec<ItemRef>,
    /// Some items were deferred and should be retried next cycle.
    pub needs_retry: bool,
}

/// A named grouping binding one data source into the rendering model.
pub struct Section {
    id: SectionId,
    data_source: SourceRef,
    cell_style: CellStyle,
    hidden: bool,
    animate_differences: bool,
    subscription: Option<Arc<Subscription>>,
    children: HashMap<ItemRef, ChildSource>,
    /// Failed insertion attempts per item.
    retries: HashMap<ItemRef, u32>,
    attachment: Option<Attachment>,
}

impl Section {
    /// Create a section. An empty identifier is rejected.
    pub fn new<I>(id: I, data_source: SourceRef) -> Result<Self>
    where
        I: TryInto<SectionId, Error = ReconcileError>,
    {
        Ok(Self {
            id: id.try_into()?,
            data_source,
            cell_style: CellStyle::default(),
            hidden: false,
            animate_differences: true,
            subscription: None,
            children: HashMap::new(),
            retries: HashMap::new(),
            attachment: None,
        })
    }

    pub fn with_cell_style(mut self, style: CellStyle) -> Self {
        self.cell_style = style;
        self
    }

    pub fn with_hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    pub fn with_animate_differences(mut self, animate: bool) -> Self {
        self.animate_differences = animate;
        self
    }

    pub fn id(&self) -> &SectionId {
        &self.id
    }

    pub fn data_source(&self) -> &SourceRef {
        &self.data_source
    }

    pub fn cell_style(&self) -> CellStyle {
        self.cell_style
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn set_hidden(&mut self, hidden: bool) {
        self.hidden = hidden;
    }

    pub fn is_attached(&self) -> bool {
        self.attachment.is_some()
    }

    /// Replace the data source. The old subscription and every child source
    /// are torn down.
    pub fn set_data_source(&mut self, data_source: SourceRef) {
        if let Some(subscription) = self.subscription.take() {
            subscription.terminate();
        }
        self.teardown_all();
        self.data_source = data_source;

        if let Some((context, trigger)) = self.attachment_parts() {
            self.subscribe_root(context, trigger);
        }
    }

    fn attachment_parts(&self) -> Option<(UpdateContext, UpdateTrigger)> {
        self.attachment
            .as_ref()
            .map(|attachment| (attachment.context.clone(), Arc::clone(&attachment.trigger)))
    }

    fn subscribe_root(&mut self, context: UpdateContext, trigger: UpdateTrigger) {
        let animate = self.animate_differences;
        self.subscription = Some(subscribe(
            &self.data_source,
            ExecutionContext::Update(context),
            SubscriptionConfig::default(),
            move |_| trigger(animate),
        ));
    }

    /// Bind to a controller: subscribe to the data source with updates
    /// marshaled onto `context`.
    pub(crate) fn attach(&mut self, context: UpdateContext, trigger: UpdateTrigger) {
        self.detach();
        self.subscribe_root(context.clone(), Arc::clone(&trigger));
        self.attachment = Some(Attachment { context, trigger });
        tracing::debug!(section = %self.id, source = ?self.data_source.id(), "section attached");
    }

    /// Terminate every subscription this section holds.
    pub(crate) fn detach(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.terminate();
        }
        self.teardown_all();
        self.retries.clear();
        if self.attachment.take().is_some() {
            tracing::debug!(section = %self.id, "section detached");
        }
    }

    fn request_update(&self) {
        if let Some(attachment) = &self.attachment {
            (attachment.trigger)(self.animate_differences);
        }
    }

    // --- Expansion ---

    /// Expand `item`, which appears under the expanded item `parent` (or at
    /// the root level for `None`).
    ///
    /// Returns `Ok(false)` without side effects if the item is already
    /// expanded or has no children.
    pub fn expand(&mut self, item: &ItemRef, parent: Option<&ItemRef>) -> Result<bool> {
        let Some((context, trigger)) = self.attachment_parts() else {
            return Err(ReconcileError::NotAttached(self.id.clone()));
        };

        if self.children.contains_key(item) {
            return Ok(false);
        }

        let parent_source = match parent {
            None => Arc::clone(&self.data_source),
            Some(parent) => match self.children.get(parent) {
                Some(child) => Arc::clone(&child.source),
                None => {
                    tracing::debug!(section = %self.id, item = %item, parent = %parent, "parent is not expanded");
                    return Ok(false);
                }
            },
        };

        let record = match parent_source.record(item.reference()) {
            Ok(record) => record,
            Err(e) => {
                tracing::debug!(section = %self.id, item = %item, error = %e, "no record to expand");
                return Ok(false);
            }
        };

        let Some(data_item) = record.item else {
            tracing::debug!(section = %self.id, item = %item, "record not resolved yet, not expanding");
            return Ok(false);
        };

        let Some(provider) = data_item.as_children() else {
            return Ok(false);
        };
        if !provider.has_children(&parent_source) {
            return Ok(false);
        }
        let Some(child_source) = provider.children_data_source(&parent_source) else {
            return Ok(false);
        };

        let animate = self.animate_differences;
        let subscription = subscribe(
            &child_source,
            ExecutionContext::Update(context),
            SubscriptionConfig::quiet(),
            move |_| trigger(animate),
        );

        tracing::debug!(section = %self.id, item = %item, source = ?child_source.id(), "expanded");
        self.children.insert(
            item.clone(),
            ChildSource {
                source: child_source,
                subscription,
                parent: parent.cloned(),
                merged: false,
            },
        );

        self.request_update();
        Ok(true)
    }

    /// Collapse `item` and every expanded item below it. Returns the number
    /// of child sources torn down; zero if it was not expanded.
    pub fn collapse(&mut self, item: &ItemRef) -> usize {
        let count = self.teardown(item);
        if count > 0 {
            self.request_update();
        }
        count
    }

    fn teardown(&mut self, item: &ItemRef) -> usize {
        if !self.children.contains_key(item) {
            return 0;
        }

        // Collect descendants breadth-first, deepest last
        let mut doomed = vec![item.clone()];
        let mut cursor = 0;
        while cursor < doomed.len() {
            let current = doomed[cursor].clone();
            for (child, source) in &self.children {
                if source.parent.as_ref() == Some(&current) {
                    doomed.push(child.clone());
                }
            }
            cursor += 1;
        }

        for expanded in doomed.iter().rev() {
            if let Some(child) = self.children.remove(expanded) {
                child.subscription.terminate();
            }
        }

        tracing::debug!(section = %self.id, item = %item, count = doomed.len(), "collapsed");
        doomed.len()
    }

    fn teardown_all(&mut self) {
        for (_, child) in self.children.drain() {
            child.subscription.terminate();
        }
    }

    pub fn expansion_state(&self, item: &ItemRef) -> ExpansionState {
        match self.children.get(item) {
            None => ExpansionState::Collapsed,
            Some(child) if !child.merged => ExpansionState::Expanding,
            Some(_) => ExpansionState::Expanded,
        }
    }

    pub fn is_expanded(&self, item: &ItemRef) -> bool {
        self.children.contains_key(item)
    }

    pub fn expanded_items(&self) -> Vec<ItemRef> {
        self.children.keys().cloned().collect()
    }

    pub fn child_source(&self, item: &ItemRef) -> Option<SourceRef> {
        self.children.get(item).map(|child| Arc::clone(&child.source))
    }

    /// Live child subscriptions.
    pub fn child_subscription_count(&self) -> usize {
        self.children
            .values()
            .filter(|child| !child.subscription.is_terminated())
            .count()
    }

    /// Data source holding `item`, given the section's current snapshot.
    pub fn owning_source(
        &self,
        item: &ItemRef,
        snapshot: Option<&SectionSnapshot>,
    ) -> Option<SourceRef> {
        match snapshot.and_then(|snapshot| snapshot.parent(item)) {
            None => Some(Arc::clone(&self.data_source)),
            Some(parent) => self.child_source(parent),
        }
    }

    // --- Composition ---

    /// Compose this section's part of the next model from its previous
    /// snapshot and the pending changes of its sources.
    pub(crate) fn compose(
        &mut self,
        previous: Option<&SectionSnapshot>,
        wrapper: &Wrapper,
        retry_limit: u32,
        metrics: &mut InsertionMetrics,
    ) -> Composed {
        let Some(subscription) = self.subscription.clone() else {
            return Composed::default();
        };
        let root = subscription.snapshot_resetting_change_tracking(true);

        if !wrapper.is_wrapped() {
            let items = wrapper.wrap(&root.items, &self.id);
            let reconfigured = root
                .updated
                .map(|updated| wrapper.wrap(&updated, &self.id))
                .unwrap_or_default();

            return Composed {
                snapshot: SectionSnapshot::from_items(items),
                reconfigured,
                needs_retry: false,
            };
        }

        // Every level is read before any is reconciled, so an item moving
        // between levels is seen on both sides in the same cycle
        let mut levels: HashMap<Option<ItemRef>, Snapshot> = self
            .children
            .iter()
            .map(|(item, child)| {
                (
                    Some(item.clone()),
                    child.subscription.snapshot_resetting_change_tracking(true),
                )
            })
            .collect();
        levels.insert(None, root);

        let claims = levels
            .iter()
            .map(|(parent, snapshot)| {
                let claimed: HashSet<ItemRef> = wrapper.wrap(&snapshot.items, &self.id).into_iter().collect();
                (parent.clone(), claimed)
            })
            .collect();

        let mut pass = Pass {
            wrapper,
            retry_limit,
            metrics,
            levels,
            claims,
        };
        let mut composed = Composed {
            snapshot: previous.cloned().unwrap_or_default(),
            ..Default::default()
        };

        self.reconcile_level(&mut composed, None, &mut pass);

        // Children of collapsed items leave the model
        for item in composed.snapshot.items() {
            if !self.children.contains_key(&item)
                && !composed.snapshot.children(Some(&item)).is_empty()
            {
                composed.snapshot.delete_children(&item);
                composed.snapshot.collapse(&item);
            }
        }

        let roots = composed.snapshot.children(None).to_vec();
        self.compose_nested(&mut composed, &roots, &mut pass);

        // Expanded items that are no longer shown lose their child sources
        let orphaned: Vec<ItemRef> = self
            .children
            .keys()
            .filter(|item| !composed.snapshot.contains(item))
            .cloned()
            .collect();
        for item in orphaned {
            self.teardown(&item);
        }

        // Retry counts only matter while some source still holds the item
        self.retries
            .retain(|item, _| pass.claims.values().any(|claimed| claimed.contains(item)));

        composed
    }

    /// Merge child sources level by level, parents before their children.
    fn compose_nested(&mut self, composed: &mut Composed, level: &[ItemRef], pass: &mut Pass<'_>) {
        for item in level {
            if self.children.contains_key(item) {
                self.reconcile_level(composed, Some(item), pass);
                composed.snapshot.expand(item);
                if let Some(child) = self.children.get_mut(item) {
                    child.merged = true;
                }
            }

            let nested = composed.snapshot.children(Some(item)).to_vec();
            if !nested.is_empty() {
                self.compose_nested(composed, &nested, pass);
            }
        }
    }

    /// Tear down the expansions of `item` and everything below it.
    fn release_subtree(&mut self, snapshot: &SectionSnapshot, item: &ItemRef) {
        let subtree = std::iter::once(item.clone()).chain(snapshot.descendants(item));
        for nested in subtree {
            self.teardown(&nested);
            self.retries.remove(&nested);
        }
    }

    /// Bring the children of `parent` in line with its source snapshot:
    /// removals (tearing down expansions inside them), items arriving from
    /// another level, anchored insertion, order, and reconfiguration of
    /// updated items.
    fn reconcile_level(&mut self, composed: &mut Composed, parent: Option<&ItemRef>, pass: &mut Pass<'_>) {
        let Some(source) = pass.levels.remove(&parent.cloned()) else {
            return;
        };
        let full = pass.wrapper.wrap(&source.items, &self.id);
        let wanted: HashSet<&ItemRef> = full.iter().collect();

        let stale: Vec<ItemRef> = composed
            .snapshot
            .children(parent)
            .iter()
            .filter(|item| !wanted.contains(item))
            .cloned()
            .collect();

        if !stale.is_empty() {
            for item in &stale {
                self.release_subtree(&composed.snapshot, item);
            }
            composed.snapshot.delete(&stale);
        }

        // Items shown under a level whose source no longer holds them
        let misplaced: Vec<ItemRef> = full
            .iter()
            .filter(|item| {
                if !composed.snapshot.contains(item) {
                    return false;
                }
                let current = composed.snapshot.parent(item);
                current != parent
                    && !pass
                        .claims
                        .get(&current.cloned())
                        .is_some_and(|claimed| claimed.contains(*item))
            })
            .cloned()
            .collect();

        if !misplaced.is_empty() {
            for item in &misplaced {
                tracing::debug!(section = %self.id, item = %item, "item changed level");
                self.release_subtree(&composed.snapshot, item);
            }
            composed.snapshot.delete(&misplaced);
        }

        let missing: Vec<ItemRef> = full
            .iter()
            .filter(|item| !composed.snapshot.contains(item))
            .cloned()
            .collect();

        if !missing.is_empty() {
            let placement = place_items(&mut composed.snapshot, parent, &full, &missing);
            pass.metrics.passes += placement.passes as u64;
            pass.metrics.placed += placement.placed.len() as u64;

            for item in &placement.placed {
                self.retries.remove(item);
            }

            for item in placement.deferred {
                let attempts = self.retries.entry(item.clone()).or_insert(0);
                *attempts += 1;

                if *attempts <= pass.retry_limit {
                    tracing::warn!(section = %self.id, item = %item, attempts = *attempts, "no insertion anchor, retrying next cycle");
                    pass.metrics.deferred += 1;
                    composed.needs_retry = true;
                } else if *attempts == pass.retry_limit + 1 {
                    tracing::warn!(section = %self.id, item = %item, attempts = *attempts, "no insertion anchor, leaving item out");
                    pass.metrics.abandoned += 1;
                } else {
                    tracing::trace!(section = %self.id, item = %item, "still no insertion anchor");
                }
            }
        }

        composed.snapshot.reorder_children(parent, &full);

        if let Some(updated) = &source.updated {
            composed.reconfigured.extend(
                updated
                    .iter()
                    .map(|reference| pass.wrapper.wrap_one(reference, &self.id))
                    .filter(|item| composed.snapshot.contains(item)),
            );
        }
    }
}

/// Inputs shared by every level of one wrapped compose.
struct Pass<'a> {
    wrapper: &'a Wrapper,
    retry_limit: u32,
    metrics: &'a mut InsertionMetrics,
    /// Source snapshots not reconciled yet, keyed by parent item.
    levels: HashMap<Option<ItemRef>, Snapshot>,
    /// Items each level's source holds this cycle.
    claims: HashMap<Option<ItemRef>, HashSet<ItemRef>>,
}

impl Drop for Section {
    fn drop(&mut self) {
        self.detach();
    }
}

impl fmt::Debug for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Section")
            .field("id", &self.id)
            .field("source", &self.data_source.id())
            .field("cell_style", &self.cell_style)
            .field("hidden", &self.hidden)
            .field("expanded", &self.children.len())
            .field("attached", &self.is_attached())
            .finish()
    }
}
