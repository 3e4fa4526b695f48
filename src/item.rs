//! Domain item contract with compile-time declared capabilities.
//!
//! Optional behaviour is never discovered by runtime type checks. Each item type
//! declares what it supports through [`Capabilities`] and hands out the
//! matching interface through the `as_*` accessors.

use crate::error::Result;
use crate::section::Section;
use crate::sources::SourceRef;
use crate::types::{ItemType, Reference};
use std::fmt;

/// Optional capabilities an item type implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// Item can be expanded into a child data source.
    pub children: bool,
    /// Item takes part in selection handling.
    pub selection: bool,
    /// Item can be dragged.
    pub drag: bool,
    /// Item accepts drops.
    pub drop: bool,
    /// Item provides swipe actions.
    pub swipe: bool,
}

impl Capabilities {
    /// No optional capabilities.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_children(mut self, enabled: bool) -> Self {
        self.children = enabled;
        self
    }

    pub fn with_selection(mut self, enabled: bool) -> Self {
        self.selection = enabled;
        self
    }

    pub fn with_drag(mut self, enabled: bool) -> Self {
        self.drag = enabled;
        self
    }

    pub fn with_drop(mut self, enabled: bool) -> Self {
        self.drop = enabled;
        self
    }

    pub fn with_swipe(mut self, enabled: bool) -> Self {
        self.swipe = enabled;
        self
    }
}

/// A resolved domain item (file, share, account, action...).
pub trait DataItem: Send + Sync + fmt::Debug {
    /// Identity of this item in its data source.
    fn reference(&self) -> Reference;

    /// Type tag used for cell provider dispatch.
    fn item_type(&self) -> ItemType;

    /// Content version. Versioned sources report an item as updated when
    /// this changes.
    fn version(&self) -> Option<u64> {
        None
    }

    /// Children capability.
    fn as_children(&self) -> Option<&dyn ChildrenProvider> {
        None
    }

    /// Selection capability.
    fn as_selectable(&self) -> Option<&dyn SelectionInteraction> {
        None
    }

    /// Section capability, for items of a controller's sections source.
    fn as_section_provider(&self) -> Option<&dyn SectionProvider> {
        None
    }

    /// Declared capabilities, derived from the accessors by default.
    fn capabilities(&self) -> Capabilities {
        Capabilities::none()
            .with_children(self.as_children().is_some())
            .with_selection(self.as_selectable().is_some())
    }
}

/// Items that can lazily provide a child data source.
pub trait ChildrenProvider: Send + Sync {
    /// Whether this item currently has children in `parent_source`.
    fn has_children(&self, parent_source: &SourceRef) -> bool;

    /// Data source for the children, scoped to this item.
    fn children_data_source(&self, parent_source: &SourceRef) -> Option<SourceRef>;
}

/// Items that want a say in selection.
pub trait SelectionInteraction: Send + Sync {
    fn allow_selection(&self) -> bool {
        true
    }
}

/// Items that stand for one section of a controller.
pub trait SectionProvider: Send + Sync {
    /// Build the section. Called when the item enters the sections source;
    /// the controller keeps the section until the item leaves it.
    fn make_section(&self) -> Result<Section>;
}
