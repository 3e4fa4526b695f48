//! Anchored insertion of newly added items.
//!
//! The model only supports inserting next to an existing item, so each added
//! item is placed before its successor or after its predecessor from the
//! source's full order. Items whose neighbours are not in the model yet are
//! retried in later passes, until a pass makes no progress.

use super::snapshot::SectionSnapshot;
use crate::types::ItemRef;
use serde::Serialize;
use std::collections::HashMap;

/// Outcome of one [`place_items`] call.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Placement {
    /// Items inserted, in placement order.
    pub placed: Vec<ItemRef>,
    /// Items that found no anchor.
    pub deferred: Vec<ItemRef>,
    /// Passes run over the pending items.
    pub passes: usize,
}

/// Insert `added` under `parent`, following `full_order`, the complete
/// current item list of the data source feeding that parent.
pub fn place_items(
    snapshot: &mut SectionSnapshot,
    parent: Option<&ItemRef>,
    full_order: &[ItemRef],
    added: &[ItemRef],
) -> Placement {
    let positions: HashMap<&ItemRef, usize> = full_order
        .iter()
        .enumerate()
        .map(|(index, item)| (item, index))
        .collect();

    let mut placement = Placement::default();
    let mut pending: Vec<ItemRef> = added
        .iter()
        .filter(|item| !snapshot.contains(item))
        .cloned()
        .collect();

    while !pending.is_empty() {
        placement.passes += 1;
        let mut deferred = Vec::new();
        let mut progress = false;

        for item in pending {
            let Some(&index) = positions.get(&item) else {
                tracing::warn!(item = %item, "added item missing from source order");
                deferred.push(item);
                continue;
            };

            if place_one(snapshot, parent, full_order, index, &item) {
                placement.placed.push(item);
                progress = true;
            } else {
                deferred.push(item);
            }
        }

        pending = deferred;
        if !progress {
            break;
        }
    }

    placement.deferred = pending;
    placement
}

fn place_one(
    snapshot: &mut SectionSnapshot,
    parent: Option<&ItemRef>,
    full_order: &[ItemRef],
    index: usize,
    item: &ItemRef,
) -> bool {
    if full_order.len() == 1 || snapshot.children(parent).is_empty() {
        return snapshot.append(std::slice::from_ref(item), parent) == 1;
    }

    let is_sibling = |candidate: &ItemRef| {
        snapshot.contains(candidate) && snapshot.parent(candidate) == parent
    };

    if let Some(next) = full_order.get(index + 1).filter(|next| is_sibling(next)) {
        let next = next.clone();
        return snapshot.insert_before(item.clone(), &next);
    }

    if let Some(previous) = index
        .checked_sub(1)
        .and_then(|previous| full_order.get(previous))
        .filter(|previous| is_sibling(previous))
    {
        let previous = previous.clone();
        return snapshot.insert_after(item.clone(), &previous);
    }

    false
}
