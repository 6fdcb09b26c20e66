/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Filling in a SHAMap from nodes received from peers, and serving nodes to peers.
//!
//! A map being acquired starts out [synching](SHAMapState::Synching) with only the hash of its root known.
//! The acquirer repeatedly asks [`get_missing_nodes`](SHAMap::get_missing_nodes) which nodes it still
//! needs, requests them from peers (who answer with [`get_node_fat`](SHAMap::get_node_fat)), and feeds the
//! answers to [`add_root_node`](SHAMap::add_root_node) and [`add_known_node`](SHAMap::add_known_node). Every
//! node is verified against the hash its parent expects before it is attached, and is written to the store
//! as soon as it is attached.

use std::{collections::VecDeque, sync::Arc};

use crate::{
    node_store::{NodeObjectType, NodeStore},
    types::data_types::CryptoHash,
};

use super::{
    family::Family,
    implementation::{inner_mut, SHAMap, SHAMapError, SHAMapState, SHAMapType},
    node::{Branch, InnerNode, TreeNode},
    node_id::SHAMapNodeId,
};

/// What became of a node offered to a synching map.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SHAMapAddNode {
    /// The node was missing, and has been verified and attached.
    Useful,

    /// The map already had the node.
    Duplicate,

    /// The node does not fit anywhere the map currently knows about.
    Invalid,
}

impl<S: NodeStore> SHAMap<S> {
    /// Create an empty map that will be filled in until its root hash is `root_hash`.
    pub fn new_synching(family: Arc<Family<S>>, root_hash: CryptoHash, map_type: SHAMapType) -> Self {
        let mut map = SHAMap::new(family, map_type);
        map.state = SHAMapState::Synching;
        map.sync_target = Some(root_hash);
        map
    }

    pub fn is_synching(&self) -> bool {
        self.state == SHAMapState::Synching
    }

    /// The root hash a synching map is being filled in towards.
    pub fn sync_target(&self) -> Option<CryptoHash> {
        self.sync_target
    }

    fn root_missing(&self) -> Option<CryptoHash> {
        self.sync_target
            .filter(|target| !target.is_zero() && self.root.hash() != *target)
    }

    /// Get up to `max` nodes that are referenced by the map but are neither in memory nor in the store,
    /// with the hash each of them is expected to have.
    pub fn get_missing_nodes(
        &self,
        max: usize,
    ) -> Result<Vec<(SHAMapNodeId, CryptoHash)>, SHAMapError> {
        if let Some(target) = self.root_missing() {
            return Ok(vec![(SHAMapNodeId::root(), target)]);
        }
        let mut missing = Vec::new();
        let root = Arc::clone(&self.root);
        self.missing_below(&root, SHAMapNodeId::root(), max, &mut missing)?;
        Ok(missing)
    }

    /// Returns whether the subtree below `node` is complete.
    fn missing_below(
        &self,
        node: &Arc<TreeNode>,
        node_id: SHAMapNodeId,
        max: usize,
        missing: &mut Vec<(SHAMapNodeId, CryptoHash)>,
    ) -> Result<bool, SHAMapError> {
        let inner = match node.as_inner() {
            Some(inner) => inner,
            None => return Ok(true),
        };
        let track_full_below = self.is_synching();
        if track_full_below && self.family.is_full_below(&inner.hash()) {
            return Ok(true);
        }

        let mut complete = true;
        for (branch, child) in inner.branches().iter().enumerate() {
            if missing.len() >= max {
                return Ok(false);
            }
            let child = match child {
                Branch::Empty => continue,
                Branch::Resolved(child) => Arc::clone(child),
                Branch::Unresolved(hash) => {
                    if track_full_below && self.family.is_full_below(hash) {
                        continue;
                    }
                    match self.family.fetch_node(hash) {
                        Ok(child) => child,
                        Err(SHAMapError::MissingNode { .. }) => {
                            missing.push((node_id.child(branch), *hash));
                            complete = false;
                            continue;
                        }
                        Err(err) => return Err(err),
                    }
                }
            };
            if !self.missing_below(&child, node_id.child(branch), max, missing)? {
                complete = false;
            }
        }

        if complete && track_full_below {
            self.family.set_full_below(inner.hash());
        }
        Ok(complete)
    }

    /// Offer the root node of a synching map, in wire format.
    pub fn add_root_node(
        &mut self,
        hash: &CryptoHash,
        wire: &[u8],
    ) -> Result<SHAMapAddNode, SHAMapError> {
        if !self.is_synching() || self.root.hash() == *hash {
            return Ok(SHAMapAddNode::Duplicate);
        }
        if self.sync_target != Some(*hash) {
            return Ok(SHAMapAddNode::Invalid);
        }
        let node = TreeNode::from_wire(wire)?.verify(hash)?;
        if !node.is_inner() {
            return Err(SHAMapError::InvalidNode {
                reason: "root is not an inner node",
            });
        }
        let node = Arc::new(node);
        self.family
            .store_node(self.map_type.object_type(), &node)?;
        self.root = node;
        Ok(SHAMapAddNode::Useful)
    }

    /// Offer the node at `node_id`, in wire format. The node is attached only if its parent is present
    /// and the parent's branch for it holds the node's hash.
    pub fn add_known_node(
        &mut self,
        node_id: &SHAMapNodeId,
        wire: &[u8],
    ) -> Result<SHAMapAddNode, SHAMapError> {
        if !self.is_synching() {
            return Ok(SHAMapAddNode::Duplicate);
        }
        if node_id.is_root() {
            return match self.sync_target {
                Some(target) => self.add_root_node(&target, wire),
                None => Ok(SHAMapAddNode::Invalid),
            };
        }
        if self.root_missing().is_some() {
            return Ok(SHAMapAddNode::Invalid);
        }
        let node = TreeNode::from_wire(wire)?;
        let obj_type = self.map_type.object_type();
        let Self { family, root, .. } = self;
        attach_below(family, root, 0, node_id, node, obj_type)
    }

    /// Mark the map immutable if nothing is missing any more. Returns whether the map is complete.
    pub fn finish_sync(&mut self) -> Result<bool, SHAMapError> {
        if !self.is_synching() {
            return Ok(true);
        }
        if !self.get_missing_nodes(1)?.is_empty() {
            return Ok(false);
        }
        self.state = SHAMapState::Immutable;
        self.sync_target = None;
        Ok(true)
    }

    /// Get the node at `node_id` and its descendants down to `depth` levels below it, in wire format and
    /// breadth-first order. Descendants that are not available locally are skipped. Returns `None` if there
    /// is no node at `node_id`.
    pub fn get_node_fat(
        &self,
        node_id: &SHAMapNodeId,
        depth: u8,
    ) -> Result<Option<Vec<(SHAMapNodeId, Vec<u8>)>>, SHAMapError> {
        let mut node = Arc::clone(&self.root);
        let mut current = SHAMapNodeId::root();
        while current.depth() < node_id.depth() {
            let branch = current.select_branch(node_id.id());
            let next = match node.as_inner() {
                Some(inner) => match self.resolve(inner.branch(branch))? {
                    Some(child) => child,
                    None => return Ok(None),
                },
                None => return Ok(None),
            };
            node = next;
            current = current.child(branch);
        }
        if current != *node_id {
            return Ok(None);
        }

        let mut nodes = Vec::new();
        let mut queue = VecDeque::from([(node, current, 0u8)]);
        while let Some((node, id, level)) = queue.pop_front() {
            nodes.push((id, node.serialize_for_wire()));
            let inner = match node.as_inner() {
                Some(inner) if level < depth => inner,
                _ => continue,
            };
            for (branch, child) in inner.branches().iter().enumerate() {
                match self.resolve(child) {
                    Ok(Some(child)) => queue.push_back((child, id.child(branch), level + 1)),
                    Ok(None) | Err(SHAMapError::MissingNode { .. }) => {}
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(Some(nodes))
    }
}

fn attach_below<S: NodeStore>(
    family: &Family<S>,
    slot: &mut Arc<TreeNode>,
    depth: u8,
    target: &SHAMapNodeId,
    node: TreeNode,
    obj_type: NodeObjectType,
) -> Result<SHAMapAddNode, SHAMapError> {
    let branch = target.id().nibble(depth) as usize;
    let existing = match slot.as_inner().map(|inner| inner.branch(branch)) {
        None | Some(Branch::Empty) => return Ok(SHAMapAddNode::Invalid),
        Some(Branch::Resolved(_)) if depth + 1 == target.depth() => {
            return Ok(SHAMapAddNode::Duplicate)
        }
        Some(Branch::Unresolved(hash)) if depth + 1 == target.depth() => {
            let hash = *hash;
            let node = Arc::new(node.verify(&hash)?);
            family.store_node(obj_type, &node)?;
            inner_mut(slot)?.restore_branch(branch, Branch::Resolved(node));
            return Ok(SHAMapAddNode::Useful);
        }
        Some(other) => other.clone(),
    };

    let inner: &mut InnerNode = inner_mut(slot)?;
    let mut child = match existing {
        Branch::Resolved(child) => {
            drop(inner.detach_branch(branch));
            child
        }
        Branch::Unresolved(hash) => match family.fetch_node(&hash) {
            Ok(child) => child,
            Err(SHAMapError::MissingNode { .. }) => return Ok(SHAMapAddNode::Invalid),
            Err(err) => return Err(err),
        },
        Branch::Empty => return Ok(SHAMapAddNode::Invalid),
    };
    let result = attach_below(family, &mut child, depth + 1, target, node, obj_type);
    inner.restore_branch(branch, Branch::Resolved(child));
    result
}
