//! Section and model snapshots: the state handed to the rendering surface.

use crate::error::{ReconcileError, Result};
use crate::types::{IndexPath, ItemRef, Reference, SectionId};
use serde::ser::{Serialize, Serializer};
use std::collections::{HashMap, HashSet};

#[derive(Clone, Debug, Default, PartialEq)]
struct Node {
    parent: Option<ItemRef>,
    children: Vec<ItemRef>,
    expanded: bool,
}

/// Ordered tree of items within one section.
///
/// Items without a parent are roots. Children of a collapsed item stay in
/// the tree but are not visible.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SectionSnapshot {
    roots: Vec<ItemRef>,
    nodes: HashMap<ItemRef, Node>,
}

impl SectionSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flat snapshot of root items. Duplicates are skipped.
    pub fn from_items<I>(items: I) -> Self
    where
        I: IntoIterator<Item = ItemRef>,
    {
        let mut snapshot = Self::new();
        let items: Vec<ItemRef> = items.into_iter().collect();
        snapshot.append(&items, None);
        snapshot
    }

    /// Total number of items, visible or not.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, item: &ItemRef) -> bool {
        self.nodes.contains_key(item)
    }

    pub fn parent(&self, item: &ItemRef) -> Option<&ItemRef> {
        self.nodes.get(item)?.parent.as_ref()
    }

    /// Children of `parent`, or the roots for `None`.
    pub fn children(&self, parent: Option<&ItemRef>) -> &[ItemRef] {
        match parent {
            None => &self.roots,
            Some(parent) => self
                .nodes
                .get(parent)
                .map(|node| node.children.as_slice())
                .unwrap_or(&[]),
        }
    }

    fn children_mut(&mut self, parent: Option<&ItemRef>) -> Option<&mut Vec<ItemRef>> {
        match parent {
            None => Some(&mut self.roots),
            Some(parent) => self.nodes.get_mut(parent).map(|node| &mut node.children),
        }
    }

    /// Append items as the last children of `parent`. Items already in the
    /// snapshot are skipped. Returns the number appended.
    pub fn append(&mut self, items: &[ItemRef], parent: Option<&ItemRef>) -> usize {
        if let Some(parent) = parent {
            if !self.contains(parent) {
                tracing::warn!(parent = %parent, "append to missing parent ignored");
                return 0;
            }
        }

        let mut appended = 0;
        for item in items {
            if self.contains(item) {
                tracing::debug!(item = %item, "skipping duplicate item");
                continue;
            }
            self.attach(item.clone(), parent.cloned(), None);
            appended += 1;
        }
        appended
    }

    fn attach(&mut self, item: ItemRef, parent: Option<ItemRef>, index: Option<usize>) {
        if let Some(siblings) = self.children_mut(parent.as_ref()) {
            match index {
                Some(index) => siblings.insert(index.min(siblings.len()), item.clone()),
                None => siblings.push(item.clone()),
            }
        }
        self.nodes.insert(
            item,
            Node {
                parent,
                ..Default::default()
            },
        );
    }

    fn insert_next_to(&mut self, item: ItemRef, anchor: &ItemRef, offset: usize) -> bool {
        if self.contains(&item) || !self.contains(anchor) {
            return false;
        }

        let parent = self.parent(anchor).cloned();
        let index = self
            .children(parent.as_ref())
            .iter()
            .position(|sibling| sibling == anchor);

        match index {
            Some(index) => {
                self.attach(item, parent, Some(index + offset));
                true
            }
            None => false,
        }
    }

    /// Insert `item` right before `anchor`, as its sibling.
    pub fn insert_before(&mut self, item: ItemRef, anchor: &ItemRef) -> bool {
        self.insert_next_to(item, anchor, 0)
    }

    /// Insert `item` right after `anchor`, as its sibling.
    pub fn insert_after(&mut self, item: ItemRef, anchor: &ItemRef) -> bool {
        self.insert_next_to(item, anchor, 1)
    }

    /// Delete items together with all their descendants. Returns every
    /// removed item.
    pub fn delete(&mut self, items: &[ItemRef]) -> Vec<ItemRef> {
        let mut removed = Vec::new();

        for item in items {
            if !self.contains(item) {
                continue;
            }

            let parent = self.parent(item).cloned();
            if let Some(siblings) = self.children_mut(parent.as_ref()) {
                siblings.retain(|sibling| sibling != item);
            }

            for doomed in self.subtree(item) {
                self.nodes.remove(&doomed);
                removed.push(doomed);
            }
        }

        removed
    }

    /// Delete every descendant of `item`, keeping the item itself.
    pub fn delete_children(&mut self, item: &ItemRef) -> Vec<ItemRef> {
        let children = self.children(Some(item)).to_vec();
        self.delete(&children)
    }

    /// Reorder the children of `parent` to follow `order`. Children missing
    /// from `order` keep their relative order at the end. Returns true if the
    /// order changed.
    pub fn reorder_children(&mut self, parent: Option<&ItemRef>, order: &[ItemRef]) -> bool {
        let Some(siblings) = self.children_mut(parent) else {
            return false;
        };

        let present: HashSet<&ItemRef> = siblings.iter().collect();
        let mut reordered: Vec<ItemRef> = Vec::with_capacity(siblings.len());
        let mut placed: HashSet<&ItemRef> = HashSet::new();

        for item in order {
            if present.contains(item) && placed.insert(item) {
                reordered.push(item.clone());
            }
        }
        for item in siblings.iter() {
            if !placed.contains(item) {
                reordered.push(item.clone());
            }
        }

        if reordered == *siblings {
            return false;
        }
        *siblings = reordered;
        true
    }

    /// Mark an item expanded. Returns false if it is missing.
    pub fn expand(&mut self, item: &ItemRef) -> bool {
        match self.nodes.get_mut(item) {
            Some(node) => {
                node.expanded = true;
                true
            }
            None => false,
        }
    }

    pub fn collapse(&mut self, item: &ItemRef) -> bool {
        match self.nodes.get_mut(item) {
            Some(node) => {
                node.expanded = false;
                true
            }
            None => false,
        }
    }

    pub fn is_expanded(&self, item: &ItemRef) -> bool {
        self.nodes.get(item).is_some_and(|node| node.expanded)
    }

    /// Nesting depth; roots are level 0.
    pub fn level(&self, item: &ItemRef) -> Option<usize> {
        let mut node = self.nodes.get(item)?;
        let mut level = 0;
        while let Some(parent) = &node.parent {
            node = self.nodes.get(parent)?;
            level += 1;
        }
        Some(level)
    }

    /// `item` followed by all its descendants, in pre-order.
    fn subtree(&self, item: &ItemRef) -> Vec<ItemRef> {
        let mut out = vec![item.clone()];
        self.walk(self.children(Some(item)), false, &mut out);
        out
    }

    /// All descendants of `item`, in pre-order.
    pub fn descendants(&self, item: &ItemRef) -> Vec<ItemRef> {
        let mut out = Vec::new();
        self.walk(self.children(Some(item)), false, &mut out);
        out
    }

    fn walk(&self, level: &[ItemRef], visible_only: bool, out: &mut Vec<ItemRef>) {
        for item in level {
            out.push(item.clone());
            if let Some(node) = self.nodes.get(item) {
                if !visible_only || node.expanded {
                    self.walk(&node.children, visible_only, out);
                }
            }
        }
    }

    /// Every item in pre-order, including children of collapsed items.
    pub fn items(&self) -> Vec<ItemRef> {
        let mut out = Vec::with_capacity(self.nodes.len());
        self.walk(&self.roots, false, &mut out);
        out
    }

    /// Items a renderer shows: pre-order, skipping children of collapsed
    /// items.
    pub fn visible_items(&self) -> Vec<ItemRef> {
        let mut out = Vec::with_capacity(self.nodes.len());
        self.walk(&self.roots, true, &mut out);
        out
    }
}

#[derive(serde::Serialize)]
struct Row<'a> {
    item: &'a ItemRef,
    parent: Option<&'a ItemRef>,
    expanded: bool,
}

impl Serialize for SectionSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let items = self.items();
        serializer.collect_seq(items.iter().map(|item| Row {
            item,
            parent: self.parent(item),
            expanded: self.is_expanded(item),
        }))
    }
}

/// One section of the model.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct ModelSection {
    pub id: SectionId,
    pub snapshot: SectionSnapshot,
}

/// The full rendering model: ordered sections and their items.
///
/// Item identities are unique across the whole model; [`push_section`]
/// enforces it so the surface only ever receives validated snapshots.
///
/// [`push_section`]: ModelSnapshot::push_section
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize)]
pub struct ModelSnapshot {
    sections: Vec<ModelSection>,
    reconfigured: Vec<ItemRef>,
}

impl ModelSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a section. Items already shown by an earlier section are
    /// dropped with a warning; returns how many were dropped.
    pub fn push_section(&mut self, id: SectionId, mut snapshot: SectionSnapshot) -> Result<usize> {
        if self.section_index(&id).is_some() {
            return Err(ReconcileError::DuplicateSection(id));
        }

        let duplicates: Vec<ItemRef> = snapshot
            .items()
            .into_iter()
            .filter(|item| self.contains_item(item))
            .collect();

        let dropped = if duplicates.is_empty() {
            0
        } else {
            tracing::warn!(section = %id, count = duplicates.len(), "dropping items already shown by another section");
            snapshot.delete(&duplicates).len()
        };

        self.sections.push(ModelSection { id, snapshot });
        Ok(dropped)
    }

    /// Mark items for in-place reconfiguration. Items not in the model are
    /// ignored.
    pub fn reconfigure<I>(&mut self, items: I)
    where
        I: IntoIterator<Item = ItemRef>,
    {
        let mut marked: HashSet<ItemRef> = self.reconfigured.iter().cloned().collect();
        for item in items {
            if self.contains_item(&item) && marked.insert(item.clone()) {
                self.reconfigured.push(item);
            }
        }
    }

    pub fn reconfigured(&self) -> &[ItemRef] {
        &self.reconfigured
    }

    pub fn sections(&self) -> &[ModelSection] {
        &self.sections
    }

    pub fn section_ids(&self) -> Vec<SectionId> {
        self.sections.iter().map(|section| section.id.clone()).collect()
    }

    pub fn section_index(&self, id: &SectionId) -> Option<usize> {
        self.sections.iter().position(|section| &section.id == id)
    }

    pub fn section(&self, id: &SectionId) -> Option<&SectionSnapshot> {
        self.sections
            .iter()
            .find(|section| &section.id == id)
            .map(|section| &section.snapshot)
    }

    pub fn section_at(&self, index: usize) -> Option<&SectionId> {
        self.sections.get(index).map(|section| &section.id)
    }

    /// The section holding `item`.
    pub fn section_of(&self, item: &ItemRef) -> Option<&SectionId> {
        self.sections
            .iter()
            .find(|section| section.snapshot.contains(item))
            .map(|section| &section.id)
    }

    pub fn contains_item(&self, item: &ItemRef) -> bool {
        self.sections
            .iter()
            .any(|section| section.snapshot.contains(item))
    }

    /// First item showing `reference`, in model order.
    pub fn find_reference(&self, reference: &Reference) -> Option<ItemRef> {
        self.sections.iter().find_map(|section| {
            section
                .snapshot
                .items()
                .into_iter()
                .find(|item| item.reference() == reference)
        })
    }

    /// Visible items of a section.
    pub fn items_in(&self, id: &SectionId) -> Vec<ItemRef> {
        self.section(id)
            .map(SectionSnapshot::visible_items)
            .unwrap_or_default()
    }

    /// Visible position of an item. Items hidden under a collapsed parent
    /// have none.
    pub fn index_path(&self, item: &ItemRef) -> Option<IndexPath> {
        self.sections
            .iter()
            .enumerate()
            .find(|(_, section)| section.snapshot.contains(item))
            .and_then(|(index, section)| {
                section
                    .snapshot
                    .visible_items()
                    .iter()
                    .position(|visible| visible == item)
                    .map(|row| IndexPath::new(index, row))
            })
    }

    pub fn item_at(&self, path: IndexPath) -> Option<ItemRef> {
        self.sections
            .get(path.section)?
            .snapshot
            .visible_items()
            .into_iter()
            .nth(path.item)
    }

    /// Total number of items across sections.
    pub fn item_count(&self) -> usize {
        self.sections.iter().map(|section| section.snapshot.len()).sum()
    }
}
