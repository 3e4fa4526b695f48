//! The controller: owner of sections and the authoritative rendering model.
//!
//! Every model change goes through one pipeline running on the controller's
//! [`UpdateContext`]:
//!
//! 1. Sources notify; section subscriptions marshal the notification onto
//!    the update context and request an update.
//! 2. Requests fold in a [`Coalescer`] for `coalesce_delay`.
//! 3. The flush enqueues one cycle on a [`SequentialQueue`], so cycles never
//!    interleave.
//! 4. The cycle composes every visible section against the previous model,
//!    validates the result and diffs it.
//! 5. The [`RenderSurface`] applies the update; its completion advances the
//!    queue.
//!
//! ## Example
//!
//! ```ignore
//! let context = UpdateContext::new();
//! let controller = Controller::new(ControllerConfig::default(), context.clone(), surface, registry);
//!
//! controller.add_sections(vec![Section::new("files", source)?])?;
//! context.run_pending();
//! ```

mod actions;
mod config;

pub use actions::{ActionKind, ActionOutcome, CollectionAction};
pub use config::ControllerConfig;

use crate::context::{Coalescer, Done, ExecutionContext, SequentialQueue, UpdateContext};
use crate::error::{ReconcileError, Result};
use crate::model::{ModelSnapshot, ModelUpdate, Wrapper};
use crate::registry::{CellConfiguration, ProviderRegistry};
use crate::section::{InsertionMetrics, Section, UpdateTrigger};
use crate::sources::{subscribe, SourceRef};
use crate::subscriptions::{Subscription, SubscriptionConfig};
use crate::types::{IndexPath, ItemRef, ItemType, OwnerId, Record, Reference, SectionId};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Signals the end of an asynchronous surface operation.
pub type Completion = Box<dyn FnOnce() + Send + 'static>;

/// Called with the new model after every applied update.
pub type ContentListener = Arc<dyn Fn(&ModelSnapshot) + Send + Sync>;

type AfterUpdate = Box<dyn FnOnce(&ModelSnapshot) + Send + 'static>;

/// The view layer a controller drives.
///
/// Implementations must invoke every [`Completion`] exactly once, from any
/// thread. The next update cycle does not start before they do.
pub trait RenderSurface: Send + Sync + 'static {
    /// What cell providers produce for this surface.
    type Cell;

    /// Apply a validated model. `update.old` is what the surface showed
    /// before.
    fn apply_snapshot(&self, update: &ModelUpdate, animated: bool, completion: Completion);

    fn select_item(&self, _item: &ItemRef, _position: IndexPath, _animated: bool, completion: Completion) {
        completion()
    }

    fn set_highlighted(&self, _item: &ItemRef, _position: IndexPath, _highlighted: bool, completion: Completion) {
        completion()
    }

    fn unhighlight_all(&self, completion: Completion) {
        completion()
    }
}

/// Mutable controller state, only touched under one lock.
#[derive(Default)]
struct ControllerState {
    /// All sections, hidden ones included, in display order.
    sections: Vec<Section>,

    /// Model last handed to the surface.
    model: ModelSnapshot,

    /// Items to reconfigure on the next cycle.
    pending_reconfigure: Vec<ItemRef>,

    /// Sections whose items are all reconfigured on the next cycle.
    reload: HashSet<SectionId>,

    /// Reference still waiting to be highlighted.
    pending_highlight: Option<Reference>,

    /// Sections built from the sections source, by the item they came from.
    sourced: HashMap<Reference, SectionId>,
}

impl ControllerState {
    fn section_mut(&mut self, id: &SectionId) -> Option<&mut Section> {
        self.sections.iter_mut().find(|section| section.id() == id)
    }

    /// Source holding `item` in the current model.
    fn owning_source(&self, item: &ItemRef) -> Option<(SectionId, SourceRef)> {
        let section_id = self.model.section_of(item)?;
        let section = self.sections.iter().find(|section| section.id() == section_id)?;
        let source = section.owning_source(item, self.model.section(section_id))?;
        Some((section_id.clone(), source))
    }
}

struct ControllerInner<S: RenderSurface> {
    config: ControllerConfig,
    context: UpdateContext,
    surface: Arc<S>,
    registry: Arc<ProviderRegistry<S::Cell>>,

    /// Identity used for owner-scoped provider lookups.
    owner: OwnerId,
    wrapper: Wrapper,

    state: Mutex<ControllerState>,
    coalescer: Coalescer,
    queue: SequentialQueue,
    listeners: Mutex<Vec<ContentListener>>,
    metrics: Mutex<InsertionMetrics>,
    /// Subscription to the source the section list follows, if any.
    sections_source: Mutex<Option<Arc<Subscription>>>,
    shut_down: AtomicBool,
    this: Weak<ControllerInner<S>>,
}

/// Owner of sections and the rendering model.
///
/// All model changes are applied by update cycles on the controller's
/// update context; the host must pump that context.
pub struct Controller<S: RenderSurface> {
    inner: Arc<ControllerInner<S>>,
}

impl<S: RenderSurface> Controller<S> {
    pub fn new(
        config: ControllerConfig,
        context: UpdateContext,
        surface: Arc<S>,
        registry: Arc<ProviderRegistry<S::Cell>>,
    ) -> Self {
        let inner = Arc::new_cyclic(|this| ControllerInner {
            wrapper: Wrapper::new(config.wraps_identifiers()),
            coalescer: Coalescer::new(config.coalesce_delay),
            queue: SequentialQueue::new(context.clone()),
            state: Mutex::new(ControllerState {
                pending_highlight: config.initial_highlight.clone(),
                ..Default::default()
            }),
            owner: OwnerId::next(),
            config,
            context,
            surface,
            registry,
            listeners: Mutex::new(Vec::new()),
            metrics: Mutex::new(InsertionMetrics::default()),
            sections_source: Mutex::new(None),
            shut_down: AtomicBool::new(false),
            this: this.clone(),
        });

        tracing::debug!(owner = ?inner.owner, hierarchical = inner.config.hierarchical, "controller created");
        Self { inner }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    pub fn context(&self) -> &UpdateContext {
        &self.inner.context
    }

    pub fn surface(&self) -> &Arc<S> {
        &self.inner.surface
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry<S::Cell>> {
        &self.inner.registry
    }

    pub fn owner(&self) -> OwnerId {
        self.inner.owner
    }

    // --- Sections ---

    /// Append sections and schedule an update.
    pub fn add_sections(&self, sections: Vec<Section>) -> Result<()> {
        let at = self.inner.state.lock().sections.len();
        self.insert_sections(sections, at)
    }

    /// Insert sections before position `at` (clamped). Fails without
    /// changes if any identifier is already in use.
    pub fn insert_sections(&self, mut sections: Vec<Section>, at: usize) -> Result<()> {
        if sections.is_empty() {
            return Ok(());
        }

        {
            let mut state = self.inner.state.lock();

            let mut seen: HashSet<SectionId> =
                state.sections.iter().map(|section| section.id().clone()).collect();
            if let Some(duplicate) = sections.iter().find(|section| !seen.insert(section.id().clone())) {
                return Err(ReconcileError::DuplicateSection(duplicate.id().clone()));
            }

            let at = at.min(state.sections.len());
            let trigger = self.inner.trigger();
            for section in &mut sections {
                section.attach(self.inner.context.clone(), Arc::clone(&trigger));
            }
            tracing::debug!(count = sections.len(), at, "inserting sections");
            state.sections.splice(at..at, sections);
        }

        self.set_needs_update(self.inner.config.animate_differences);
        Ok(())
    }

    /// Remove sections, terminating their subscriptions. Returns how many
    /// were removed.
    pub fn remove_sections(&self, ids: &[SectionId]) -> usize {
        let removed: Vec<Section> = {
            let mut state = self.inner.state.lock();
            let (removed, kept): (Vec<Section>, Vec<Section>) = std::mem::take(&mut state.sections)
                .into_iter()
                .partition(|section| ids.contains(section.id()));
            state.sections = kept;
            removed
        };

        let count = removed.len();
        for mut section in removed {
            section.detach();
        }

        if count > 0 {
            tracing::debug!(count, "removed sections");
            self.set_needs_update(self.inner.config.animate_differences);
        }
        count
    }

    pub fn set_section_hidden(&self, id: &SectionId, hidden: bool) -> Result<()> {
        let changed = {
            let mut state = self.inner.state.lock();
            let section = state
                .section_mut(id)
                .ok_or_else(|| ReconcileError::SectionNotFound(id.clone()))?;
            let changed = section.is_hidden() != hidden;
            section.set_hidden(hidden);
            changed
        };

        if changed {
            self.set_needs_update(self.inner.config.animate_differences);
        }
        Ok(())
    }

    /// Mutate several sections at once; one update follows.
    pub fn update_sections<F, R>(&self, f: F, animated: bool) -> R
    where
        F: FnOnce(&mut [Section]) -> R,
    {
        let result = {
            let mut state = self.inner.state.lock();
            f(&mut state.sections)
        };
        self.set_needs_update(animated);
        result
    }

    /// Reconfigure every item of the given sections on the next cycle.
    pub fn reload_sections(&self, ids: &[SectionId]) {
        self.inner.state.lock().reload.extend(ids.iter().cloned());
        self.set_needs_update(false);
    }

    /// Identifiers of all sections, hidden ones included.
    pub fn section_ids(&self) -> Vec<SectionId> {
        self.inner
            .state
            .lock()
            .sections
            .iter()
            .map(|section| section.id().clone())
            .collect()
    }

    /// Section shown at `index` in the current model.
    pub fn section_at(&self, index: usize) -> Option<SectionId> {
        self.inner.state.lock().model.section_at(index).cloned()
    }

    /// Index of a section in the current model; hidden sections have none.
    pub fn index_of(&self, id: &SectionId) -> Option<usize> {
        self.inner.state.lock().model.section_index(id)
    }

    /// Run `f` against one section. Changes it makes to expansion or data
    /// sources schedule their own updates.
    pub fn with_section<F, R>(&self, id: &SectionId, f: F) -> Result<R>
    where
        F: FnOnce(&mut Section) -> R,
    {
        let mut state = self.inner.state.lock();
        let section = state
            .section_mut(id)
            .ok_or_else(|| ReconcileError::SectionNotFound(id.clone()))?;
        Ok(f(section))
    }

    /// Let a data source define the section list.
    ///
    /// Every item of `source` that is a [`SectionProvider`] stands for one
    /// section, in source order. Sections are built when their item appears
    /// and detached when it leaves; sections not provided by the source are
    /// dropped on its first update. `None` stops following the current
    /// source and leaves the sections as they are.
    ///
    /// [`SectionProvider`]: crate::item::SectionProvider
    pub fn set_sections_source(&self, source: Option<SourceRef>) {
        if let Some(previous) = self.inner.sections_source.lock().take() {
            previous.terminate();
        }
        self.inner.state.lock().sourced.clear();

        let Some(source) = source else {
            return;
        };
        if self.is_shut_down() {
            return;
        }

        let this = self.inner.this.clone();
        let origin = Arc::clone(&source);
        let subscription = subscribe(
            &source,
            ExecutionContext::Update(self.inner.context.clone()),
            SubscriptionConfig::default(),
            move |subscription| {
                if let Some(inner) = this.upgrade() {
                    inner.sync_sections(&origin, subscription);
                }
            },
        );

        tracing::debug!(source = ?source.id(), "following sections source");
        *self.inner.sections_source.lock() = Some(subscription);
    }

    // --- Model ---

    /// Request an update cycle.
    pub fn set_needs_update(&self, animated: bool) {
        self.inner.set_needs_update(animated);
    }

    /// The model last handed to the surface.
    pub fn model(&self) -> ModelSnapshot {
        self.inner.state.lock().model.clone()
    }

    pub fn wrap(&self, reference: &Reference, section: &SectionId) -> ItemRef {
        self.inner.wrapper.wrap_one(reference, section)
    }

    pub fn unwrap(&self, item: &ItemRef) -> (Reference, Option<SectionId>) {
        self.inner.wrapper.unwrap(item)
    }

    pub fn index_path(&self, item: &ItemRef) -> Option<IndexPath> {
        self.inner.state.lock().model.index_path(item)
    }

    /// Index paths of the items present in the model, in `items` order.
    /// Absent items are skipped.
    pub fn retrieve_index_paths(&self, items: &[ItemRef]) -> Vec<IndexPath> {
        let state = self.inner.state.lock();
        items
            .iter()
            .filter_map(|item| state.model.index_path(item))
            .collect()
    }

    /// Fetch the record shown at `path`, asynchronously if the source has
    /// not resolved it yet.
    pub fn retrieve_record<F>(&self, path: IndexPath, completion: F)
    where
        F: FnOnce(Result<Record>) + Send + 'static,
    {
        let target = {
            let state = self.inner.state.lock();
            state
                .model
                .item_at(path)
                .and_then(|item| state.owning_source(&item).map(|(_, source)| (item, source)))
        };

        match target {
            Some((item, source)) => source.retrieve_record(item.reference(), Box::new(completion)),
            None => completion(Err(ReconcileError::InvalidIndexPath(path))),
        }
    }

    /// Realize the item at `path` through the provider registry.
    ///
    /// Records that are not resolved yet produce a placeholder; once the
    /// source resolves them the item is reconfigured.
    pub fn provide_cell(&self, path: IndexPath) -> Result<S::Cell> {
        let (item, section, style, source) = {
            let state = self.inner.state.lock();
            let item = state
                .model
                .item_at(path)
                .ok_or(ReconcileError::InvalidIndexPath(path))?;
            let (section_id, source) = state
                .owning_source(&item)
                .ok_or(ReconcileError::InvalidIndexPath(path))?;
            let style = state
                .sections
                .iter()
                .find(|section| section.id() == &section_id)
                .map(Section::cell_style)
                .unwrap_or_default();
            (item, section_id, style, source)
        };

        let record = source.record(item.reference()).ok();
        if !record.as_ref().is_some_and(Record::is_resolved) {
            self.inner.resolve_later(&source, item.clone());
        }

        let item_type = record
            .as_ref()
            .map(|record| record.item_type.clone())
            .unwrap_or(ItemType::PRESENTABLE);
        let provider = self
            .inner
            .registry
            .provider_for_owner(self.inner.owner, &item_type)
            .ok_or_else(|| ReconcileError::NoProvider(item_type.clone()))?;

        let configuration = CellConfiguration {
            section,
            item,
            record,
            style,
            source: Some(source),
        };
        Ok(provider.provide_cell(&configuration))
    }

    /// Refresh items in place on the next cycle.
    pub fn request_reconfigure<I>(&self, items: I)
    where
        I: IntoIterator<Item = ItemRef>,
    {
        self.inner.request_reconfigure(items);
    }

    /// Register a listener called after every applied update.
    pub fn on_content_update<F>(&self, listener: F)
    where
        F: Fn(&ModelSnapshot) + Send + Sync + 'static,
    {
        self.inner.listeners.lock().push(Arc::new(listener));
    }

    pub fn insertion_metrics(&self) -> InsertionMetrics {
        *self.inner.metrics.lock()
    }

    // --- Actions ---

    /// Run an action through the update pipeline. `completion` always
    /// fires, after the surface finished.
    pub fn perform<F>(&self, action: CollectionAction, completion: F)
    where
        F: FnOnce(ActionOutcome) + Send + 'static,
    {
        let this = self.inner.this.clone();
        self.inner.queue.push(move |done| match this.upgrade() {
            Some(inner) => inner.run_action(action, done, Box::new(completion)),
            None => completion(ActionOutcome::NoTarget),
        });
    }

    pub fn select<F>(&self, targets: Vec<ItemRef>, animated: bool, completion: F)
    where
        F: FnOnce(ActionOutcome) + Send + 'static,
    {
        self.perform(CollectionAction::select(targets).animated(animated), completion);
    }

    pub fn highlight<F>(&self, targets: Vec<ItemRef>, completion: F)
    where
        F: FnOnce(ActionOutcome) + Send + 'static,
    {
        self.perform(CollectionAction::highlight(targets), completion);
    }

    pub fn unhighlight_all<F>(&self, completion: F)
    where
        F: FnOnce(ActionOutcome) + Send + 'static,
    {
        self.perform(CollectionAction::unhighlight_all(), completion);
    }

    pub fn expand<F>(&self, targets: Vec<ItemRef>, animated: bool, completion: F)
    where
        F: FnOnce(ActionOutcome) + Send + 'static,
    {
        self.perform(CollectionAction::expand(targets).animated(animated), completion);
    }

    pub fn collapse<F>(&self, targets: Vec<ItemRef>, animated: bool, completion: F)
    where
        F: FnOnce(ActionOutcome) + Send + 'static,
    {
        self.perform(CollectionAction::collapse(targets).animated(animated), completion);
    }

    /// Detach every section and drop owner-scoped providers. Further update
    /// requests are ignored. Idempotent.
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(subscription) = self.inner.sections_source.lock().take() {
            subscription.terminate();
        }

        let sections = std::mem::take(&mut self.inner.state.lock().sections);
        for mut section in sections {
            section.detach();
        }

        self.inner.listeners.lock().clear();
        self.inner.registry.owner_destroyed(self.inner.owner);
        tracing::debug!(owner = ?self.inner.owner, "controller shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }
}

/// Section for one item of a sections source, if the item provides one.
fn build_section(source: &SourceRef, reference: &Reference) -> Option<Section> {
    let record = match source.record(reference) {
        Ok(record) => record,
        Err(e) => {
            tracing::debug!(reference = %reference, error = %e, "no record for section item");
            return None;
        }
    };
    let provider = record.item.as_deref()?.as_section_provider()?;

    match provider.make_section() {
        Ok(section) => Some(section),
        Err(e) => {
            tracing::warn!(reference = %reference, error = %e, "section item did not build a section");
            None
        }
    }
}

impl<S: RenderSurface> Drop for Controller<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<S: RenderSurface> fmt::Debug for Controller<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Controller")
            .field("owner", &self.inner.owner)
            .field("sections", &state.sections.len())
            .field("items", &state.model.item_count())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl<S: RenderSurface> ControllerInner<S> {
    /// Update trigger handed to sections.
    fn trigger(&self) -> UpdateTrigger {
        let this = self.this.clone();
        Arc::new(move |animated: bool| {
            if let Some(inner) = this.upgrade() {
                inner.set_needs_update(animated);
            }
        })
    }

    fn set_needs_update(&self, animated: bool) {
        if self.shut_down.load(Ordering::Acquire) {
            return;
        }

        if self.coalescer.request(animated) {
            let this = self.this.clone();
            self.context.dispatch_after(self.coalescer.delay(), move || {
                if let Some(inner) = this.upgrade() {
                    inner.flush();
                }
            });
        }
    }

    /// Turn the folded requests into one queued cycle.
    fn flush(&self) {
        let Some(animated) = self.coalescer.take() else {
            return;
        };

        let this = self.this.clone();
        self.queue.push(move |done| {
            if let Some(inner) = this.upgrade() {
                inner.perform_update(animated, done, None);
            }
        });
    }

    fn request_reconfigure<I>(&self, items: I)
    where
        I: IntoIterator<Item = ItemRef>,
    {
        {
            let mut state = self.state.lock();
            for item in items {
                if !state.pending_reconfigure.contains(&item) {
                    state.pending_reconfigure.push(item);
                }
            }
        }
        self.set_needs_update(self.config.animate_differences);
    }

    /// Rebuild the section list from the sections source.
    fn sync_sections(&self, source: &SourceRef, subscription: &Subscription) {
        if self.shut_down.load(Ordering::Acquire) {
            return;
        }
        let snapshot = subscription.snapshot_resetting_change_tracking(true);

        // Providers run without the state lock held
        let known: HashSet<Reference> = {
            let state = self.state.lock();
            state
                .sourced
                .iter()
                .filter(|(_, id)| state.sections.iter().any(|section| section.id() == *id))
                .map(|(reference, _)| reference.clone())
                .collect()
        };
        let mut built: HashMap<Reference, Section> = HashMap::new();
        for reference in snapshot.items.iter().filter(|reference| !known.contains(*reference)) {
            if let Some(section) = build_section(source, reference) {
                built.insert(reference.clone(), section);
            }
        }

        let dropped: Vec<Section> = {
            let mut state = self.state.lock();
            let mut previous: HashMap<SectionId, Section> = std::mem::take(&mut state.sections)
                .into_iter()
                .map(|section| (section.id().clone(), section))
                .collect();
            let mut sections: Vec<Section> = Vec::with_capacity(snapshot.items.len());
            let mut sourced = HashMap::new();
            let mut repeated = Vec::new();
            let trigger = self.trigger();

            for reference in &snapshot.items {
                let kept = state.sourced.get(reference).and_then(|id| previous.remove(id));
                let section = match kept {
                    Some(section) => section,
                    None => match built.remove(reference) {
                        Some(mut section) => {
                            section.attach(self.context.clone(), Arc::clone(&trigger));
                            section
                        }
                        None => continue,
                    },
                };

                if sections.iter().any(|existing| existing.id() == section.id()) {
                    tracing::warn!(section = %section.id(), reference = %reference, "sections source repeats a section identifier");
                    repeated.push(section);
                    continue;
                }
                sourced.insert(reference.clone(), section.id().clone());
                sections.push(section);
            }

            tracing::debug!(sections = sections.len(), dropped = previous.len(), "sections synced from source");
            state.sections = sections;
            state.sourced = sourced;
            previous.into_values().chain(repeated).collect()
        };

        for mut section in dropped.into_iter().chain(built.into_values()) {
            section.detach();
        }
        self.set_needs_update(self.config.animate_differences);
    }

    /// Ask the source for the record and reconfigure `item` once it is
    /// resolved.
    fn resolve_later(&self, source: &SourceRef, item: ItemRef) {
        let this = self.this.clone();
        let reference = item.reference().clone();
        source.retrieve_record(
            &reference,
            Box::new(move |result| match result {
                Ok(_) => {
                    if let Some(inner) = this.upgrade() {
                        inner.request_reconfigure([item]);
                    }
                }
                Err(e) => tracing::debug!(item = %item, error = %e, "record did not resolve"),
            }),
        );
    }

    /// One update cycle. `done` advances the queue once the surface
    /// finished; `after` runs right before that.
    fn perform_update(&self, animated: bool, done: Done, after: Option<AfterUpdate>) {
        if self.shut_down.load(Ordering::Acquire) {
            if let Some(after) = after {
                let model = self.state.lock().model.clone();
                after(&model);
            }
            return;
        }

        let (update, needs_retry) = {
            let mut state = self.state.lock();
            let mut metrics = self.metrics.lock();
            self.compose(&mut state, &mut metrics)
        };

        if !update.diff.has_changes() {
            tracing::trace!("update cycle without changes");
            self.finish_update(&update.new, animated, needs_retry, after);
            done.finish();
            return;
        }

        tracing::debug!(
            inserted = update.diff.inserted_items.len(),
            deleted = update.diff.deleted_items.len(),
            moved = update.diff.moved_items.len(),
            reconfigured = update.diff.reconfigured_items.len(),
            "applying model update"
        );

        let this = self.this.clone();
        let model = update.new.clone();
        self.surface.apply_snapshot(
            &update,
            animated && self.config.animate_differences,
            Box::new(move || {
                if let Some(inner) = this.upgrade() {
                    inner.finish_update(&model, animated, needs_retry, after);
                }
                done.finish();
            }),
        );
    }

    /// Compose the next model from every visible section.
    fn compose(&self, state: &mut ControllerState, metrics: &mut InsertionMetrics) -> (ModelUpdate, bool) {
        metrics.cycles += 1;

        let old = state.model.clone();
        let reload = std::mem::take(&mut state.reload);
        let mut model = ModelSnapshot::new();
        let mut reconfigured = Vec::new();
        let mut needs_retry = false;

        for section in state.sections.iter_mut().filter(|section| !section.is_hidden()) {
            let composed = section.compose(
                old.section(section.id()),
                &self.wrapper,
                self.config.max_insertion_retries,
                metrics,
            );
            needs_retry |= composed.needs_retry;

            if reload.contains(section.id()) {
                reconfigured.extend(composed.snapshot.items());
            }
            reconfigured.extend(composed.reconfigured);

            if let Err(e) = model.push_section(section.id().clone(), composed.snapshot) {
                tracing::warn!(section = %section.id(), error = %e, "section left out of the model");
            }
        }

        reconfigured.append(&mut state.pending_reconfigure);
        model.reconfigure(reconfigured);

        state.model = model.clone();
        (ModelUpdate::new(old, model), needs_retry)
    }

    fn finish_update(&self, model: &ModelSnapshot, animated: bool, needs_retry: bool, after: Option<AfterUpdate>) {
        let listeners = self.listeners.lock().clone();
        for listener in listeners {
            listener(model);
        }

        self.highlight_initial(model);

        if let Some(after) = after {
            after(model);
        }

        if needs_retry {
            self.set_needs_update(animated);
        }
    }

    /// Highlight the configured reference the first time it shows up.
    fn highlight_initial(&self, model: &ModelSnapshot) {
        let target = {
            let mut state = self.state.lock();
            let Some(reference) = state.pending_highlight.as_ref() else {
                return;
            };
            let Some(position) = model
                .find_reference(reference)
                .and_then(|item| model.index_path(&item).map(|position| (item, position)))
            else {
                return;
            };
            state.pending_highlight = None;
            position
        };

        let (item, position) = target;
        tracing::debug!(item = %item, "applying initial highlight");
        self.surface.set_highlighted(&item, position, true, Box::new(|| {}));
    }
}
