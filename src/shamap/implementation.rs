/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`SHAMap`] type and its read, write, snapshot, and flush operations.

use std::{
    fmt::{self, Display, Formatter},
    sync::Arc,
};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    node_store::{NodeObject, NodeObjectType, NodeStore, NodeStoreError},
    types::data_types::{CryptoHash, LedgerSeq},
};

use super::{
    family::Family,
    item::{LeafKind, SHAMapItem},
    node::{Branch, InnerNode, LeafNode, TreeNode},
};

/// Whether a SHAMap holds transactions or account state. Determines the [`NodeObjectType`] its nodes are
/// stored as.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub enum SHAMapType {
    Transaction,
    State,
}

impl SHAMapType {
    pub fn object_type(&self) -> NodeObjectType {
        match self {
            SHAMapType::Transaction => NodeObjectType::TransactionNode,
            SHAMapType::State => NodeObjectType::AccountNode,
        }
    }
}

/// Lifecycle state of a SHAMap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SHAMapState {
    /// Items may be inserted, updated, and erased.
    Modifying,

    /// The map belongs to a closed ledger or an agreed transaction set and can no longer change.
    Immutable,

    /// The map is being filled in with nodes received from peers.
    Synching,
}

/// A Merkle radix-16 trie mapping 256-bit keys to [`SHAMapItem`]s.
///
/// ## Structure
///
/// The root is always an inner node. Below it, the branch taken at depth `d` is the `d`-th nibble of the
/// item's key. A leaf sits at the shallowest depth at which its key prefix is unique, and a non-root inner
/// node always has either two or more children or a single inner child. The structure, and therefore the
/// root hash, depends only on the set of items, not on the order they were inserted in.
///
/// ## Sharing
///
/// Nodes are held in `Arc`s. [`snapshot`](Self::snapshot) is O(1): the snapshot and the original share
/// every node, and the first write to a shared node on either side copies it (and its ancestors) first.
///
/// ## Persistence
///
/// Nodes created or changed by writes are dirty until [`flush_dirty`](Self::flush_dirty) collects them.
/// Nodes that are not in memory are read from the map's [`Family`] on demand.
pub struct SHAMap<S: NodeStore> {
    pub(super) family: Arc<Family<S>>,
    pub(super) root: Arc<TreeNode>,
    pub(super) map_type: SHAMapType,
    pub(super) state: SHAMapState,
    pub(super) ledger_seq: LedgerSeq,
    pub(super) sync_target: Option<CryptoHash>,
}

impl<S: NodeStore> SHAMap<S> {
    /// Create an empty, modifiable map.
    pub fn new(family: Arc<Family<S>>, map_type: SHAMapType) -> Self {
        Self {
            family,
            root: Arc::new(TreeNode::Inner(InnerNode::empty())),
            map_type,
            state: SHAMapState::Modifying,
            ledger_seq: LedgerSeq::default(),
            sync_target: None,
        }
    }

    /// Open the immutable map whose root hash is `root_hash`. Nodes are read from `family` lazily as they
    /// are needed, but the root node itself must be present.
    pub fn from_root_hash(
        family: Arc<Family<S>>,
        root_hash: &CryptoHash,
        map_type: SHAMapType,
    ) -> Result<Self, SHAMapError> {
        let root = if root_hash.is_zero() {
            Arc::new(TreeNode::Inner(InnerNode::empty()))
        } else {
            let root = family.fetch_node(root_hash)?;
            if !root.is_inner() {
                return Err(SHAMapError::InvalidNode {
                    reason: "root is not an inner node",
                });
            }
            root
        };
        Ok(Self {
            family,
            root,
            map_type,
            state: SHAMapState::Immutable,
            ledger_seq: LedgerSeq::default(),
            sync_target: None,
        })
    }

    pub fn family(&self) -> &Arc<Family<S>> {
        &self.family
    }

    pub fn map_type(&self) -> SHAMapType {
        self.map_type
    }

    pub fn state(&self) -> SHAMapState {
        self.state
    }

    pub fn is_immutable(&self) -> bool {
        self.state == SHAMapState::Immutable
    }

    /// Forbid further writes.
    pub fn set_immutable(&mut self) {
        self.state = SHAMapState::Immutable;
    }

    /// Sequence number of the ledger this map belongs to, if it belongs to one.
    pub fn ledger_seq(&self) -> LedgerSeq {
        self.ledger_seq
    }

    pub fn set_ledger_seq(&mut self, seq: LedgerSeq) {
        self.ledger_seq = seq;
    }

    /// The root hash. Zero for an empty map.
    pub fn hash(&self) -> CryptoHash {
        self.root.hash()
    }

    pub fn root_node(&self) -> &Arc<TreeNode> {
        &self.root
    }

    pub fn is_empty(&self) -> bool {
        self.root.as_inner().map_or(true, InnerNode::is_empty)
    }

    /// Create a map with the same contents that shares every node with `self`. If `mutable`, the snapshot
    /// can be written to without affecting `self` (and vice versa).
    pub fn snapshot(&self, mutable: bool) -> SHAMap<S> {
        SHAMap {
            family: Arc::clone(&self.family),
            root: Arc::clone(&self.root),
            map_type: self.map_type,
            state: if mutable {
                SHAMapState::Modifying
            } else {
                SHAMapState::Immutable
            },
            ledger_seq: self.ledger_seq,
            sync_target: None,
        }
    }

    /// Get the node a branch refers to, reading it from the family if it is not in memory.
    pub(super) fn resolve(&self, branch: &Branch) -> Result<Option<Arc<TreeNode>>, SHAMapError> {
        match branch {
            Branch::Empty => Ok(None),
            Branch::Resolved(node) => Ok(Some(Arc::clone(node))),
            Branch::Unresolved(hash) => self.family.fetch_node(hash).map(Some),
        }
    }

    /// Get the leaf with `key`, if the map contains one.
    fn find_leaf(&self, key: &CryptoHash) -> Result<Option<Arc<TreeNode>>, SHAMapError> {
        let mut node = Arc::clone(&self.root);
        let mut depth = 0u8;
        loop {
            let next = match node.as_ref() {
                TreeNode::Leaf(leaf) => {
                    return Ok(if leaf.key() == key { Some(node) } else { None });
                }
                TreeNode::Inner(inner) => {
                    match self.resolve(inner.branch(key.nibble(depth) as usize))? {
                        Some(child) => child,
                        None => return Ok(None),
                    }
                }
            };
            node = next;
            depth += 1;
        }
    }

    /// Get the item with `key`.
    pub fn fetch(&self, key: &CryptoHash) -> Result<Option<Arc<SHAMapItem>>, SHAMapError> {
        Ok(self
            .find_leaf(key)?
            .and_then(|node| node.as_leaf().map(|leaf| Arc::clone(leaf.item()))))
    }

    /// Get the item with `key` together with the kind of leaf it is stored in.
    pub fn fetch_with_kind(
        &self,
        key: &CryptoHash,
    ) -> Result<Option<(Arc<SHAMapItem>, LeafKind)>, SHAMapError> {
        Ok(self.find_leaf(key)?.and_then(|node| {
            node.as_leaf()
                .map(|leaf| (Arc::clone(leaf.item()), leaf.kind()))
        }))
    }

    pub fn has_item(&self, key: &CryptoHash) -> Result<bool, SHAMapError> {
        Ok(self.find_leaf(key)?.is_some())
    }

    /// Add `item`. Returns `false` and leaves the map unchanged if an item with the same key is already
    /// present. A [`LeafKind::TransactionNoMeta`] item must be keyed by its transaction id.
    pub fn insert(&mut self, item: SHAMapItem, kind: LeafKind) -> Result<bool, SHAMapError> {
        self.check_mutable()?;
        if self.has_item(item.key())? {
            return Ok(false);
        }
        let Self { family, root, .. } = self;
        let leaf = LeafNode::checked(Arc::new(item), kind)?;
        insert_below(family, root, 0, leaf)?;
        Ok(true)
    }

    /// Replace the data of the item with `item`'s key. Returns `false` and leaves the map unchanged if no
    /// item with that key is present, or if the present item already has the same data.
    pub fn update(&mut self, item: SHAMapItem, kind: LeafKind) -> Result<bool, SHAMapError> {
        self.check_mutable()?;
        match self.fetch_with_kind(item.key())? {
            None => return Ok(false),
            Some((existing, existing_kind)) => {
                if existing.data() == item.data() && existing_kind == kind {
                    return Ok(false);
                }
            }
        }
        let Self { family, root, .. } = self;
        let leaf = LeafNode::checked(Arc::new(item), kind)?;
        update_below(family, root, 0, leaf)?;
        Ok(true)
    }

    /// Remove the item with `key`. Returns `false` if there is no such item.
    pub fn erase(&mut self, key: &CryptoHash) -> Result<bool, SHAMapError> {
        self.check_mutable()?;
        if !self.has_item(key)? {
            return Ok(false);
        }
        let Self { family, root, .. } = self;
        erase_below(family, root, 0, key)?;
        Ok(true)
    }

    fn check_mutable(&self) -> Result<(), SHAMapError> {
        match self.state {
            SHAMapState::Modifying => Ok(()),
            SHAMapState::Immutable | SHAMapState::Synching => Err(SHAMapError::Immutable),
        }
    }

    /// Call `visitor` on every item in key order.
    pub fn visit_leaves(
        &self,
        mut visitor: impl FnMut(&Arc<SHAMapItem>),
    ) -> Result<(), SHAMapError> {
        self.visit_leaves_below(&self.root, &mut visitor)
    }

    fn visit_leaves_below(
        &self,
        node: &Arc<TreeNode>,
        visitor: &mut impl FnMut(&Arc<SHAMapItem>),
    ) -> Result<(), SHAMapError> {
        match node.as_ref() {
            TreeNode::Leaf(leaf) => visitor(leaf.item()),
            TreeNode::Inner(inner) => {
                for branch in inner.branches() {
                    if let Some(child) = self.resolve(branch)? {
                        self.visit_leaves_below(&child, visitor)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Get every item in key order.
    pub fn items(&self) -> Result<Vec<Arc<SHAMapItem>>, SHAMapError> {
        let mut items = Vec::new();
        self.visit_leaves(|item| items.push(Arc::clone(item)))?;
        Ok(items)
    }

    /// Count the items. Walks the whole map.
    pub fn len(&self) -> Result<usize, SHAMapError> {
        let mut count = 0;
        self.visit_leaves(|_| count += 1)?;
        Ok(count)
    }

    /// Get the item with the smallest key strictly greater than `key`.
    pub fn upper_bound(&self, key: &CryptoHash) -> Result<Option<Arc<SHAMapItem>>, SHAMapError> {
        self.upper_bound_below(&self.root, 0, key)
    }

    fn upper_bound_below(
        &self,
        node: &Arc<TreeNode>,
        depth: u8,
        key: &CryptoHash,
    ) -> Result<Option<Arc<SHAMapItem>>, SHAMapError> {
        match node.as_ref() {
            TreeNode::Leaf(leaf) => Ok((leaf.key() > key).then(|| Arc::clone(leaf.item()))),
            TreeNode::Inner(inner) => {
                let start = key.nibble(depth) as usize;
                if let Some(child) = self.resolve(inner.branch(start))? {
                    if let Some(item) = self.upper_bound_below(&child, depth + 1, key)? {
                        return Ok(Some(item));
                    }
                }
                for branch in (start + 1)..16 {
                    if let Some(child) = self.resolve(inner.branch(branch))? {
                        return self.first_below(&child);
                    }
                }
                Ok(None)
            }
        }
    }

    fn first_below(&self, node: &Arc<TreeNode>) -> Result<Option<Arc<SHAMapItem>>, SHAMapError> {
        match node.as_ref() {
            TreeNode::Leaf(leaf) => Ok(Some(Arc::clone(leaf.item()))),
            TreeNode::Inner(inner) => {
                for branch in inner.branches() {
                    if let Some(child) = self.resolve(branch)? {
                        return self.first_below(&child);
                    }
                }
                Ok(None)
            }
        }
    }

    /// Collect every dirty node as a [`NodeObject`], children before parents, and mark them clean. Flushed
    /// nodes are added to the family's cache. The empty root is never flushed.
    pub fn flush_dirty(&mut self) -> Vec<NodeObject> {
        let obj_type = self.map_type.object_type();
        let mut objects = Vec::new();
        let Self { family, root, .. } = self;
        flush_below(family, root, obj_type, &mut objects);
        objects
    }
}

/// Resolve a branch that was taken out of its parent. On failure, the branch is handed back so the caller
/// can put it back.
fn take_resolved<S: NodeStore>(
    family: &Family<S>,
    branch: Branch,
) -> Result<Arc<TreeNode>, (SHAMapError, Branch)> {
    match branch {
        Branch::Resolved(node) => Ok(node),
        Branch::Unresolved(hash) => family
            .fetch_node(&hash)
            .map_err(|err| (err, Branch::Unresolved(hash))),
        Branch::Empty => Err((
            SHAMapError::InvalidNode {
                reason: "expected a child in an empty branch",
            },
            Branch::Empty,
        )),
    }
}

pub(super) fn inner_mut(slot: &mut Arc<TreeNode>) -> Result<&mut InnerNode, SHAMapError> {
    Arc::make_mut(slot)
        .as_inner_mut()
        .ok_or(SHAMapError::InvalidNode {
            reason: "expected an inner node",
        })
}

/// Take the child in `branch` of `inner`, putting the branch back untouched if the child can't be read.
fn take_child<S: NodeStore>(
    family: &Family<S>,
    inner: &mut InnerNode,
    branch: usize,
) -> Result<Arc<TreeNode>, SHAMapError> {
    let taken = inner.take_branch(branch);
    take_resolved(family, taken).map_err(|(err, original)| {
        inner.set_branch(branch, original);
        err
    })
}

fn insert_below<S: NodeStore>(
    family: &Family<S>,
    slot: &mut Arc<TreeNode>,
    depth: u8,
    leaf: LeafNode,
) -> Result<(), SHAMapError> {
    let inner = inner_mut(slot)?;
    let branch = leaf.key().nibble(depth) as usize;
    if inner.branch(branch).is_empty() {
        inner.set_branch(branch, Branch::Resolved(Arc::new(TreeNode::Leaf(leaf))));
        return Ok(());
    }

    let mut child = take_child(family, inner, branch)?;
    if child.is_inner() {
        let result = insert_below(family, &mut child, depth + 1, leaf);
        inner.set_branch(branch, Branch::Resolved(child));
        result
    } else {
        inner.set_branch(branch, Branch::Resolved(split(child, leaf, depth + 1)));
        Ok(())
    }
}

/// Build the chain of inner nodes that separates `existing` from `new_leaf`, starting at `depth`. The two
/// leaves must have different keys that share a prefix of `depth` nibbles.
fn split(existing: Arc<TreeNode>, new_leaf: LeafNode, depth: u8) -> Arc<TreeNode> {
    let existing_branch = existing
        .as_leaf()
        .map_or(0, |leaf| leaf.key().nibble(depth) as usize);
    let new_branch = new_leaf.key().nibble(depth) as usize;
    let mut inner = InnerNode::empty();
    if existing_branch != new_branch {
        inner.set_branch(existing_branch, Branch::Resolved(existing));
        inner.set_branch(
            new_branch,
            Branch::Resolved(Arc::new(TreeNode::Leaf(new_leaf))),
        );
    } else {
        inner.set_branch(
            new_branch,
            Branch::Resolved(split(existing, new_leaf, depth + 1)),
        );
    }
    Arc::new(TreeNode::Inner(inner))
}

fn update_below<S: NodeStore>(
    family: &Family<S>,
    slot: &mut Arc<TreeNode>,
    depth: u8,
    leaf: LeafNode,
) -> Result<(), SHAMapError> {
    let inner = inner_mut(slot)?;
    let branch = leaf.key().nibble(depth) as usize;
    let mut child = take_child(family, inner, branch)?;
    if child.is_inner() {
        let result = update_below(family, &mut child, depth + 1, leaf);
        inner.set_branch(branch, Branch::Resolved(child));
        result
    } else {
        inner.set_branch(branch, Branch::Resolved(Arc::new(TreeNode::Leaf(leaf))));
        Ok(())
    }
}

/// Erase the leaf with `key` from below the inner node in `slot`, collapsing inner nodes that are left
/// with no children or with a single leaf child.
fn erase_below<S: NodeStore>(
    family: &Family<S>,
    slot: &mut Arc<TreeNode>,
    depth: u8,
    key: &CryptoHash,
) -> Result<(), SHAMapError> {
    let inner = inner_mut(slot)?;
    let branch = key.nibble(depth) as usize;
    let mut child = take_child(family, inner, branch)?;
    if child.is_leaf() {
        // The branch is left empty.
        return Ok(());
    }

    if let Err(err) = erase_below(family, &mut child, depth + 1, key) {
        inner.set_branch(branch, Branch::Resolved(child));
        return Err(err);
    }

    let replacement = match child.as_inner().and_then(InnerNode::single_branch) {
        Some(only) => match take_resolved(family, child.branch_clone(only)) {
            Ok(grandchild) if grandchild.is_leaf() => Branch::Resolved(grandchild),
            Ok(_) => Branch::Resolved(child),
            Err((err, _)) => {
                inner.set_branch(branch, Branch::Resolved(child));
                return Err(err);
            }
        },
        None if child.as_inner().map_or(false, InnerNode::is_empty) => Branch::Empty,
        None => Branch::Resolved(child),
    };
    inner.set_branch(branch, replacement);
    Ok(())
}

fn flush_below<S: NodeStore>(
    family: &Family<S>,
    slot: &mut Arc<TreeNode>,
    obj_type: NodeObjectType,
    objects: &mut Vec<NodeObject>,
) {
    if !slot.is_dirty() {
        return;
    }
    let node = Arc::make_mut(slot);
    if let Some(inner) = node.as_inner_mut() {
        for child in inner.resolved_children_mut() {
            flush_below(family, child, obj_type, objects);
        }
    }
    node.set_clean();
    let hash = node.hash();
    if hash.is_zero() {
        return;
    }
    objects.push(NodeObject::new(obj_type, hash, node.serialize_with_prefix()));
    family.cache().insert(hash, Arc::clone(slot));
}

impl TreeNode {
    /// Clone the contents of `branch` of an inner node. Leaves have no branches.
    fn branch_clone(&self, branch: usize) -> Branch {
        match self {
            TreeNode::Inner(inner) => inner.branch(branch).clone(),
            TreeNode::Leaf(_) => Branch::Empty,
        }
    }
}

/// Error when reading or writing a SHAMap. The error may arise in the following circumstances:
/// 1. A node the operation needed is neither in memory nor in the store.
/// 2. A node read from the store or received from a peer does not hash to the expected hash.
/// 3. A node could not be decoded, or the tree does not have the shape the operation expected.
/// 4. A write was attempted on an immutable map.
/// 5. The store failed.
#[derive(Debug)]
pub enum SHAMapError {
    MissingNode {
        hash: CryptoHash,
    },
    HashMismatch {
        expected: CryptoHash,
        actual: CryptoHash,
    },
    InvalidNode {
        reason: &'static str,
    },
    Immutable,
    NodeStoreError(NodeStoreError),
}

impl SHAMapError {
    /// Whether a node, from memory or from the store, did not hash to the hash it was expected to have.
    pub fn is_hash_mismatch(&self) -> bool {
        match self {
            SHAMapError::HashMismatch { .. } => true,
            SHAMapError::NodeStoreError(err) => err.is_hash_mismatch(),
            _ => false,
        }
    }
}

impl From<NodeStoreError> for SHAMapError {
    fn from(value: NodeStoreError) -> Self {
        SHAMapError::NodeStoreError(value)
    }
}

impl Display for SHAMapError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SHAMapError::MissingNode { hash } => write!(f, "missing node {}", hash),
            SHAMapError::HashMismatch { expected, actual } => {
                write!(f, "expected node {} but got {}", expected, actual)
            }
            SHAMapError::InvalidNode { reason } => write!(f, "invalid node: {}", reason),
            SHAMapError::Immutable => write!(f, "map is immutable"),
            SHAMapError::NodeStoreError(err) => Display::fmt(err, f),
        }
    }
}
