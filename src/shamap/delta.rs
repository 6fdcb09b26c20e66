/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Computing the difference between two SHAMaps.
//!
//! The comparison walks both trees in lockstep and skips every pair of subtrees whose hashes are equal,
//! so its cost is proportional to the size of the difference rather than the size of the maps.

use std::{collections::BTreeMap, sync::Arc};

use crate::{node_store::NodeStore, types::data_types::CryptoHash};

use super::{
    implementation::{SHAMap, SHAMapError},
    item::SHAMapItem,
    node::TreeNode,
};

/// How an item differs between two maps. `ours` is the item in the map [`compare`](SHAMap::compare) was
/// called on, and `theirs` is the item in the other map. `None` means the map has no item with that key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeltaItem {
    pub ours: Option<Arc<SHAMapItem>>,
    pub theirs: Option<Arc<SHAMapItem>>,
}

/// The result of [`SHAMap::compare`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delta {
    /// Every key whose item is absent from one map or has different data in the two maps.
    pub items: BTreeMap<CryptoHash, DeltaItem>,

    /// `false` if the comparison stopped early because the number of differences exceeded the limit.
    pub complete: bool,

    /// Number of tree nodes the comparison looked at.
    pub nodes_visited: usize,
}

impl Default for Delta {
    fn default() -> Self {
        Self {
            items: BTreeMap::new(),
            complete: true,
            nodes_visited: 0,
        }
    }
}

impl Delta {
    fn add(
        &mut self,
        key: CryptoHash,
        ours: Option<Arc<SHAMapItem>>,
        theirs: Option<Arc<SHAMapItem>>,
    ) {
        self.items.insert(key, DeltaItem { ours, theirs });
    }
}

/// Which side of the comparison a subtree being walked belongs to.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Side {
    Ours,
    Theirs,
}

impl<S: NodeStore> SHAMap<S> {
    /// Get the items that differ between `self` and `other`, stopping once more than `max_count`
    /// differences have been found.
    pub fn compare(&self, other: &SHAMap<S>, max_count: usize) -> Result<Delta, SHAMapError> {
        let mut delta = Delta::default();
        if self.hash() == other.hash() {
            return Ok(delta);
        }

        let mut stack = vec![(Arc::clone(&self.root), Arc::clone(&other.root))];
        while let Some((ours, theirs)) = stack.pop() {
            delta.nodes_visited += 2;
            match (ours.as_ref(), theirs.as_ref()) {
                (TreeNode::Leaf(our_leaf), TreeNode::Leaf(their_leaf)) => {
                    if our_leaf.key() == their_leaf.key() {
                        if our_leaf.item().data() != their_leaf.item().data() {
                            delta.add(
                                *our_leaf.key(),
                                Some(Arc::clone(our_leaf.item())),
                                Some(Arc::clone(their_leaf.item())),
                            );
                        }
                    } else {
                        delta.add(*our_leaf.key(), Some(Arc::clone(our_leaf.item())), None);
                        delta.add(*their_leaf.key(), None, Some(Arc::clone(their_leaf.item())));
                    }
                }
                (TreeNode::Inner(_), TreeNode::Leaf(their_leaf)) => {
                    self.walk_branch(&ours, Some(their_leaf.item()), Side::Ours, &mut delta)?;
                }
                (TreeNode::Leaf(our_leaf), TreeNode::Inner(_)) => {
                    other.walk_branch(&theirs, Some(our_leaf.item()), Side::Theirs, &mut delta)?;
                }
                (TreeNode::Inner(our_inner), TreeNode::Inner(their_inner)) => {
                    for branch in 0..16 {
                        let our_branch = our_inner.branch(branch);
                        let their_branch = their_inner.branch(branch);
                        if our_branch.hash() == their_branch.hash() {
                            continue;
                        }
                        match (self.resolve(our_branch)?, other.resolve(their_branch)?) {
                            (Some(our_child), Some(their_child)) => {
                                stack.push((our_child, their_child))
                            }
                            (Some(our_child), None) => {
                                self.walk_branch(&our_child, None, Side::Ours, &mut delta)?
                            }
                            (None, Some(their_child)) => {
                                other.walk_branch(&their_child, None, Side::Theirs, &mut delta)?
                            }
                            (None, None) => {}
                        }
                    }
                }
            }

            if delta.items.len() > max_count {
                delta.complete = false;
                return Ok(delta);
            }
        }
        Ok(delta)
    }

    /// Add every item of the subtree rooted at `node` (which is on `side`) to `delta`, matching them against
    /// `other_item`, the single item the other map has at the same position, if any.
    fn walk_branch(
        &self,
        node: &Arc<TreeNode>,
        other_item: Option<&Arc<SHAMapItem>>,
        side: Side,
        delta: &mut Delta,
    ) -> Result<(), SHAMapError> {
        let mut other_matched = false;
        let mut stack = vec![Arc::clone(node)];
        while let Some(node) = stack.pop() {
            delta.nodes_visited += 1;
            match node.as_ref() {
                TreeNode::Inner(inner) => {
                    for branch in inner.branches() {
                        if let Some(child) = self.resolve(branch)? {
                            stack.push(child);
                        }
                    }
                }
                TreeNode::Leaf(leaf) => {
                    let item = Arc::clone(leaf.item());
                    let matching = other_item.filter(|other| other.key() == item.key());
                    match matching {
                        Some(other) => {
                            other_matched = true;
                            if other.data() != item.data() {
                                add_sided(delta, side, item, Some(Arc::clone(other)));
                            }
                        }
                        None => add_sided(delta, side, item, None),
                    }
                }
            }
        }

        if let (Some(other), false) = (other_item, other_matched) {
            let key = *other.key();
            match side {
                Side::Ours => delta.add(key, None, Some(Arc::clone(other))),
                Side::Theirs => delta.add(key, Some(Arc::clone(other)), None),
            }
        }
        Ok(())
    }
}

fn add_sided(
    delta: &mut Delta,
    side: Side,
    item: Arc<SHAMapItem>,
    counterpart: Option<Arc<SHAMapItem>>,
) {
    let key = *item.key();
    match side {
        Side::Ours => delta.add(key, Some(item), counterpart),
        Side::Theirs => delta.add(key, counterpart, Some(item)),
    }
}
