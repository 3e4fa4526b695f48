//! Differences between two model snapshots.

use super::snapshot::ModelSnapshot;
use crate::types::{ItemRef, SectionId};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Location of an item: its section and parent.
type Location = (SectionId, Option<ItemRef>);

/// What changed between two models.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ModelDiff {
    pub inserted_sections: Vec<SectionId>,
    pub deleted_sections: Vec<SectionId>,
    pub inserted_items: Vec<ItemRef>,
    pub deleted_items: Vec<ItemRef>,
    /// Items that changed parent, section, or order among their siblings.
    pub moved_items: Vec<ItemRef>,
    pub reconfigured_items: Vec<ItemRef>,
    /// Items whose expanded flag flipped.
    pub expansion_changed: Vec<ItemRef>,
}

impl ModelDiff {
    pub fn between(old: &ModelSnapshot, new: &ModelSnapshot) -> Self {
        let old_sections: HashSet<&SectionId> = old.sections().iter().map(|s| &s.id).collect();
        let new_sections: HashSet<&SectionId> = new.sections().iter().map(|s| &s.id).collect();

        let inserted_sections = new
            .sections()
            .iter()
            .filter(|s| !old_sections.contains(&s.id))
            .map(|s| s.id.clone())
            .collect();
        let deleted_sections = old
            .sections()
            .iter()
            .filter(|s| !new_sections.contains(&s.id))
            .map(|s| s.id.clone())
            .collect();

        let old_locations = locations(old);
        let new_locations = locations(new);

        let mut inserted_items = Vec::new();
        let mut moved: HashSet<ItemRef> = HashSet::new();
        let mut expansion_changed = Vec::new();

        for section in new.sections() {
            for item in section.snapshot.items() {
                match old_locations.get(&item) {
                    None => inserted_items.push(item),
                    Some((old_location, _)) => {
                        if new_locations.get(&item).map(|(location, _)| location)
                            != Some(old_location)
                        {
                            moved.insert(item.clone());
                        }
                        if old_expanded(old, old_location, &item)
                            != section.snapshot.is_expanded(&item)
                        {
                            expansion_changed.push(item);
                        }
                    }
                }
            }
        }

        let deleted_items = old
            .sections()
            .iter()
            .flat_map(|section| section.snapshot.items())
            .filter(|item| !new_locations.contains_key(item))
            .collect();

        // Reordering among siblings that kept their location
        for section in new.sections() {
            let mut parents: Vec<Option<ItemRef>> = vec![None];
            parents.extend(section.snapshot.items().into_iter().map(Some));

            for parent in parents {
                let old_indices: Vec<(ItemRef, usize)> = section
                    .snapshot
                    .children(parent.as_ref())
                    .iter()
                    .filter(|item| !moved.contains(*item))
                    .filter_map(|item| {
                        old_locations
                            .get(item)
                            .map(|(_, index)| (item.clone(), *index))
                    })
                    .collect();

                if old_indices.len() < 2 {
                    continue;
                }

                let sequence: Vec<usize> = old_indices.iter().map(|(_, index)| *index).collect();
                let stable = longest_increasing_subsequence(&sequence);
                for (position, (item, _)) in old_indices.into_iter().enumerate() {
                    if !stable.contains(&position) {
                        moved.insert(item);
                    }
                }
            }
        }

        let moved_items = new
            .sections()
            .iter()
            .flat_map(|section| section.snapshot.items())
            .filter(|item| moved.contains(item))
            .collect();

        Self {
            inserted_sections,
            deleted_sections,
            inserted_items,
            deleted_items,
            moved_items,
            reconfigured_items: new.reconfigured().to_vec(),
            expansion_changed,
        }
    }

    /// True if applying the new model changes anything.
    pub fn has_changes(&self) -> bool {
        !(self.inserted_sections.is_empty()
            && self.deleted_sections.is_empty()
            && self.inserted_items.is_empty()
            && self.deleted_items.is_empty()
            && self.moved_items.is_empty()
            && self.reconfigured_items.is_empty()
            && self.expansion_changed.is_empty())
    }
}

/// Location and sibling index of every item.
fn locations(model: &ModelSnapshot) -> HashMap<ItemRef, (Location, usize)> {
    let mut out = HashMap::new();
    for section in model.sections() {
        let mut parents: Vec<Option<ItemRef>> = vec![None];
        parents.extend(section.snapshot.items().into_iter().map(Some));

        for parent in parents {
            for (index, item) in section.snapshot.children(parent.as_ref()).iter().enumerate() {
                out.insert(item.clone(), ((section.id.clone(), parent.clone()), index));
            }
        }
    }
    out
}

fn old_expanded(old: &ModelSnapshot, location: &Location, item: &ItemRef) -> bool {
    old.section(&location.0)
        .is_some_and(|snapshot| snapshot.is_expanded(item))
}

/// Positions in `sequence` forming one longest strictly increasing
/// subsequence.
fn longest_increasing_subsequence(sequence: &[usize]) -> HashSet<usize> {
    // tails[k] = position of the smallest tail of an increasing run of length k + 1
    let mut tails: Vec<usize> = Vec::new();
    let mut previous: Vec<Option<usize>> = vec![None; sequence.len()];

    for (position, value) in sequence.iter().enumerate() {
        let slot = tails.partition_point(|&tail| sequence[tail] < *value);
        if slot > 0 {
            previous[position] = Some(tails[slot - 1]);
        }
        if slot == tails.len() {
            tails.push(position);
        } else {
            tails[slot] = position;
        }
    }

    let mut out = HashSet::new();
    let mut cursor = tails.last().copied();
    while let Some(position) = cursor {
        out.insert(position);
        cursor = previous[position];
    }
    out
}

/// What the rendering surface receives for one update cycle.
#[derive(Clone, Debug, Serialize)]
pub struct ModelUpdate {
    pub old: ModelSnapshot,
    pub new: ModelSnapshot,
    pub diff: ModelDiff,
}

impl ModelUpdate {
    pub fn new(old: ModelSnapshot, new: ModelSnapshot) -> Self {
        let diff = ModelDiff::between(&old, &new);
        Self { old, new, diff }
    }
}
