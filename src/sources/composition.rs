//! Composition of several data sources into one ordered source.

use super::{subscribe, DataSource, RecordCompletion, SourceRef};
use crate::context::ExecutionContext;
use crate::error::{ReconcileError, Result};
use crate::subscriptions::{Subscription, SubscriptionConfig, SubscriptionManager};
use crate::types::{Record, Reference, SourceId, SourceState};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

/// Decides whether a reference from a source is part of the composed list.
pub type CompositionFilter = Arc<dyn Fn(&dyn DataSource, &Reference) -> bool + Send + Sync>;

struct Member {
    source: SourceRef,
    included: bool,
    filter: Option<CompositionFilter>,
    /// Inner subscription forwarding the member's changes.
    subscription: Arc<Subscription>,
}

/// A data source merging underlying sources in registration order.
///
/// The composed list is the concatenation of every included, non-failed
/// source's items after filtering. A reference present in more than one
/// source keeps its first position; its record comes from the last source
/// holding it.
pub struct Composition {
    id: SourceId,
    members: RwLock<Vec<Member>>,
    filter: RwLock<Option<CompositionFilter>>,
    subscriptions: SubscriptionManager,
    this: Weak<Composition>,
}

impl Composition {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            id: SourceId::next(),
            members: RwLock::new(Vec::new()),
            filter: RwLock::new(None),
            subscriptions: SubscriptionManager::new(),
            this: this.clone(),
        })
    }

    /// Composition over the given sources, all included.
    pub fn with_sources(sources: Vec<SourceRef>) -> Arc<Self> {
        let composition = Self::new();
        composition.add_sources(sources);
        composition
    }

    fn member_for(&self, source: SourceRef) -> Member {
        let this = self.this.clone();
        let source_id = source.id();

        let subscription = subscribe(
            &source,
            ExecutionContext::Immediate,
            SubscriptionConfig::quiet(),
            move |sub| {
                if let Some(composition) = this.upgrade() {
                    composition.member_changed(source_id, sub);
                }
            },
        );

        Member {
            source,
            included: true,
            filter: None,
            subscription,
        }
    }

    fn member_changed(&self, source_id: SourceId, subscription: &Subscription) {
        let snapshot = subscription.snapshot_resetting_change_tracking(true);

        let included = self
            .members
            .read()
            .iter()
            .any(|member| member.source.id() == source_id && member.included);
        if !included {
            return;
        }

        let updated: Vec<Reference> = snapshot.updated.unwrap_or_default().into_iter().collect();
        self.subscriptions.notify(&updated);
    }

    /// Append sources at the end. Sources already present are skipped.
    pub fn add_sources(&self, sources: Vec<SourceRef>) {
        self.insert_at(None, sources);
    }

    /// Insert sources right after `after`, or at the front if `after` is
    /// `None` or not part of the composition.
    pub fn insert_sources(&self, after: Option<&SourceRef>, sources: Vec<SourceRef>) {
        let position = {
            let members = self.members.read();
            after
                .and_then(|anchor| {
                    members
                        .iter()
                        .position(|member| member.source.id() == anchor.id())
                })
                .map(|index| index + 1)
                .unwrap_or(0)
        };
        self.insert_at(Some(position), sources);
    }

    fn insert_at(&self, position: Option<usize>, sources: Vec<SourceRef>) {
        let fresh: Vec<SourceRef> = {
            let members = self.members.read();
            let mut seen: HashSet<SourceId> = members.iter().map(|m| m.source.id()).collect();
            sources
                .into_iter()
                .filter(|source| seen.insert(source.id()))
                .collect()
        };
        if fresh.is_empty() {
            return;
        }

        let added: Vec<Member> = fresh.into_iter().map(|source| self.member_for(source)).collect();

        {
            let mut members = self.members.write();
            let position = position.unwrap_or(members.len()).min(members.len());
            tracing::debug!(composition = ?self.id, count = added.len(), position, "adding sources");
            for (offset, member) in added.into_iter().enumerate() {
                members.insert(position + offset, member);
            }
        }

        self.subscriptions.notify(&[]);
    }

    /// Remove sources. Their items disappear from the next snapshot.
    pub fn remove_sources(&self, sources: &[SourceRef]) {
        let ids: HashSet<SourceId> = sources.iter().map(|source| source.id()).collect();

        let removed: Vec<Member> = {
            let mut members = self.members.write();
            let (removed, kept): (Vec<Member>, Vec<Member>) = members
                .drain(..)
                .partition(|member| ids.contains(&member.source.id()));
            *members = kept;
            removed
        };

        if removed.is_empty() {
            return;
        }

        for member in &removed {
            member.subscription.terminate();
        }
        tracing::debug!(composition = ?self.id, count = removed.len(), "removed sources");
        self.subscriptions.notify(&[]);
    }

    /// Include or exclude a source without removing it.
    pub fn set_include(&self, include: bool, source: &SourceRef) {
        let changed = {
            let mut members = self.members.write();
            match members
                .iter_mut()
                .find(|member| member.source.id() == source.id())
            {
                Some(member) if member.included != include => {
                    member.included = include;
                    true
                }
                _ => false,
            }
        };

        if changed {
            self.subscriptions.notify(&[]);
        }
    }

    pub fn is_included(&self, source: &SourceRef) -> bool {
        self.members
            .read()
            .iter()
            .any(|member| member.source.id() == source.id() && member.included)
    }

    /// Filter applied to every source's items.
    pub fn set_filter(&self, filter: Option<CompositionFilter>) {
        *self.filter.write() = filter;
        self.subscriptions.notify(&[]);
    }

    /// Filter applied to one source's items, before the global filter.
    pub fn set_source_filter(&self, source: &SourceRef, filter: Option<CompositionFilter>) {
        let found = {
            let mut members = self.members.write();
            match members
                .iter_mut()
                .find(|member| member.source.id() == source.id())
            {
                Some(member) => {
                    member.filter = filter;
                    true
                }
                None => false,
            }
        };

        if found {
            self.subscriptions.notify(&[]);
        }
    }

    /// All sources in merge order, included or not.
    pub fn sources(&self) -> Vec<SourceRef> {
        self.members
            .read()
            .iter()
            .map(|member| Arc::clone(&member.source))
            .collect()
    }

    /// Sources currently reporting failure, with their reason.
    pub fn failed_sources(&self) -> Vec<(SourceId, String)> {
        self.members
            .read()
            .iter()
            .filter_map(|member| match member.source.state() {
                SourceState::Failed { reason } => Some((member.source.id(), reason)),
                _ => None,
            })
            .collect()
    }

    /// Sources that contribute items right now, in merge order.
    fn contributing(&self) -> Vec<(SourceRef, Option<CompositionFilter>)> {
        self.members
            .read()
            .iter()
            .filter(|member| member.included && !member.source.state().is_failed())
            .map(|member| (Arc::clone(&member.source), member.filter.clone()))
            .collect()
    }

    fn owner_of(&self, reference: &Reference) -> Option<SourceRef> {
        let filter = self.filter.read().clone();

        self.contributing()
            .into_iter()
            .rev()
            .find(|(source, member_filter)| {
                let passes = |f: &Option<CompositionFilter>| {
                    f.as_ref()
                        .map_or(true, |f| f(source.as_ref(), reference))
                };
                passes(member_filter)
                    && passes(&filter)
                    && source.items().contains(reference)
            })
            .map(|(source, _)| source)
    }
}

impl DataSource for Composition {
    fn id(&self) -> SourceId {
        self.id
    }

    fn state(&self) -> SourceState {
        let loading = self
            .contributing()
            .iter()
            .any(|(source, _)| source.state().is_loading());

        if loading {
            SourceState::Loading
        } else {
            SourceState::Idle
        }
    }

    fn items(&self) -> Vec<Reference> {
        let filter = self.filter.read().clone();
        let mut seen = HashSet::new();
        let mut items = Vec::new();

        for (source, member_filter) in self.contributing() {
            for reference in source.items() {
                if let Some(member_filter) = &member_filter {
                    if !member_filter(source.as_ref(), &reference) {
                        continue;
                    }
                }
                if let Some(filter) = &filter {
                    if !filter(source.as_ref(), &reference) {
                        continue;
                    }
                }
                if seen.insert(reference.clone()) {
                    items.push(reference);
                }
            }
        }

        items
    }

    fn record(&self, reference: &Reference) -> Result<Record> {
        match self.owner_of(reference) {
            Some(source) => source.record(reference),
            None => Err(ReconcileError::RecordNotFound(reference.clone())),
        }
    }

    fn retrieve_record(&self, reference: &Reference, completion: RecordCompletion) {
        match self.owner_of(reference) {
            Some(source) => source.retrieve_record(reference, completion),
            None => completion(Err(ReconcileError::RecordNotFound(reference.clone()))),
        }
    }

    fn special_items(&self) -> HashMap<String, serde_json::Value> {
        let mut merged = HashMap::new();
        for (source, _) in self.contributing() {
            merged.extend(source.special_items());
        }
        merged
    }

    fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }
}

impl Drop for Composition {
    fn drop(&mut self) {
        for member in self.members.get_mut().iter() {
            member.subscription.terminate();
        }
    }
}
