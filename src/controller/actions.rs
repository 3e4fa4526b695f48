//! Programmatic select, highlight and expansion actions.
//!
//! Actions run as jobs on the controller's sequential queue, so they see the
//! model of the last finished update and never interleave with one.

use super::{ControllerInner, RenderSurface};
use crate::context::Done;
use crate::model::ModelSnapshot;
use crate::types::{IndexPath, ItemRef};
use serde::Serialize;
use std::sync::atomic::Ordering;

pub(super) type ActionCompletion = Box<dyn FnOnce(ActionOutcome) + Send + 'static>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Select,
    Highlight,
    UnhighlightAll,
    Expand,
    Collapse,
}

/// An action against the first of `targets` present in the model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CollectionAction {
    pub kind: ActionKind,
    pub targets: Vec<ItemRef>,
    pub animated: bool,
}

impl CollectionAction {
    pub fn new(kind: ActionKind, targets: Vec<ItemRef>) -> Self {
        Self {
            kind,
            targets,
            animated: true,
        }
    }

    pub fn select(targets: Vec<ItemRef>) -> Self {
        Self::new(ActionKind::Select, targets)
    }

    pub fn highlight(targets: Vec<ItemRef>) -> Self {
        Self::new(ActionKind::Highlight, targets)
    }

    pub fn unhighlight_all() -> Self {
        Self::new(ActionKind::UnhighlightAll, Vec::new())
    }

    pub fn expand(targets: Vec<ItemRef>) -> Self {
        Self::new(ActionKind::Expand, targets)
    }

    pub fn collapse(targets: Vec<ItemRef>) -> Self {
        Self::new(ActionKind::Collapse, targets)
    }

    pub fn animated(mut self, animated: bool) -> Self {
        self.animated = animated;
        self
    }
}

/// How an action ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActionOutcome {
    /// Applied to `item`, shown at `position` when the action started.
    Applied { item: ItemRef, position: IndexPath },
    /// An action without a target finished.
    Completed,
    /// None of the targets is in the model.
    NoTarget,
    /// The item refused, or the action changed nothing.
    Declined,
}

impl ActionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ActionOutcome::Applied { .. })
    }
}

/// Reports the outcome, then lets the queue move on.
struct Finish {
    completion: ActionCompletion,
    done: Done,
}

impl Finish {
    fn with(self, outcome: ActionOutcome) {
        (self.completion)(outcome);
        self.done.finish();
    }
}

impl<S: RenderSurface> ControllerInner<S> {
    pub(super) fn run_action(&self, action: CollectionAction, done: Done, completion: ActionCompletion) {
        let finish = Finish { completion, done };

        if self.shut_down.load(Ordering::Acquire) {
            finish.with(ActionOutcome::NoTarget);
            return;
        }

        if action.kind == ActionKind::UnhighlightAll {
            self.surface
                .unhighlight_all(Box::new(move || finish.with(ActionOutcome::Completed)));
            return;
        }

        let target = {
            let state = self.state.lock();
            action.targets.iter().find_map(|item| {
                state
                    .model
                    .index_path(item)
                    .map(|position| (item.clone(), position))
            })
        };

        let Some((item, position)) = target else {
            tracing::debug!(kind = ?action.kind, targets = action.targets.len(), "no action target in the model");
            finish.with(ActionOutcome::NoTarget);
            return;
        };

        let applied = ActionOutcome::Applied {
            item: item.clone(),
            position,
        };

        match action.kind {
            ActionKind::Select => {
                if !self.allows_selection(&item) {
                    tracing::debug!(item = %item, "selection declined by item");
                    finish.with(ActionOutcome::Declined);
                    return;
                }
                self.surface.select_item(
                    &item,
                    position,
                    action.animated,
                    Box::new(move || finish.with(applied)),
                );
            }
            ActionKind::Highlight => {
                self.surface
                    .set_highlighted(&item, position, true, Box::new(move || finish.with(applied)));
            }
            ActionKind::Expand | ActionKind::Collapse => {
                if !self.config.hierarchical || !self.toggle_expansion(action.kind, &item) {
                    finish.with(ActionOutcome::Declined);
                    return;
                }

                // The cycle below applies the change; drop the request the
                // section just made
                self.coalescer.take();

                let Finish { completion, done } = finish;
                self.perform_update(
                    action.animated,
                    done,
                    Some(Box::new(move |_: &ModelSnapshot| completion(applied))),
                );
            }
            ActionKind::UnhighlightAll => {}
        }
    }

    /// Expand or collapse `item` in its section. Returns true if the
    /// expansion state changed.
    fn toggle_expansion(&self, kind: ActionKind, item: &ItemRef) -> bool {
        let mut state = self.state.lock();
        let Some(section_id) = state.model.section_of(item).cloned() else {
            return false;
        };
        let parent = state
            .model
            .section(&section_id)
            .and_then(|snapshot| snapshot.parent(item))
            .cloned();
        let Some(section) = state.section_mut(&section_id) else {
            return false;
        };

        match kind {
            ActionKind::Expand => section
                .expand(item, parent.as_ref())
                .unwrap_or_else(|e| {
                    tracing::warn!(item = %item, error = %e, "expand failed");
                    false
                }),
            ActionKind::Collapse => section.collapse(item) > 0,
            _ => false,
        }
    }

    /// Whether the item's record lets it be selected. Items without a
    /// resolved record or selection capability are selectable.
    fn allows_selection(&self, item: &ItemRef) -> bool {
        let source = self.state.lock().owning_source(item);
        let Some((_, source)) = source else {
            return true;
        };

        source
            .record(item.reference())
            .ok()
            .and_then(|record| record.item)
            .and_then(|data| data.as_selectable().map(|selectable| selectable.allow_selection()))
            .unwrap_or(true)
    }
}
