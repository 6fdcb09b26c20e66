/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Tree nodes, their hashes, and their two serializations.
//!
//! ## Prefix format
//!
//! The prefix format is the exact byte string that is hashed to get a node's hash, and is also what is
//! written to the [`NodeStore`](crate::node_store::NodeStore):
//!
//! |Node|Bytes|
//! |---|---|
//! |Inner|`MIN\0` ‖ 16 × child hash (zero for an empty branch)|
//! |Account state leaf|`MLN\0` ‖ data ‖ key|
//! |Transaction with metadata leaf|`SND\0` ‖ data ‖ key|
//! |Transaction without metadata leaf|`TXN\0` ‖ data|
//!
//! ## Wire format
//!
//! The wire format is what peers exchange while syncing. It ends with a one byte type tag:
//!
//! |Tag|Node|Bytes before tag|
//! |---|---|---|
//! |0|Transaction without metadata|data|
//! |1|Account state|data ‖ key|
//! |2|Full inner|16 × child hash|
//! |3|Compressed inner|(child hash ‖ branch) for each non-empty branch|
//! |4|Transaction with metadata|data ‖ key|
//!
//! Inner nodes are sent compressed when fewer than [`COMPRESSION_THRESHOLD`] branches are occupied.

use std::sync::{Arc, OnceLock};

use crate::types::{
    crypto_primitives::{sha512_half, transaction_id, HashPrefix},
    data_types::CryptoHash,
};

use super::{
    implementation::SHAMapError,
    item::{LeafKind, SHAMapItem},
};

/// Inner nodes with fewer occupied branches than this are sent in compressed wire format.
pub const COMPRESSION_THRESHOLD: usize = 12;

const WIRE_TX_NO_META: u8 = 0;
const WIRE_ACCOUNT_STATE: u8 = 1;
const WIRE_INNER_FULL: u8 = 2;
const WIRE_INNER_COMPRESSED: u8 = 3;
const WIRE_TX_WITH_META: u8 = 4;

/// A node of a SHAMap: either an inner node with 16 branches or a leaf holding one item.
#[derive(Clone, Debug)]
pub enum TreeNode {
    Inner(InnerNode),
    Leaf(LeafNode),
}

impl TreeNode {
    /// Create a new, dirty leaf node.
    pub fn new_leaf(item: SHAMapItem, kind: LeafKind) -> TreeNode {
        TreeNode::Leaf(LeafNode::new(Arc::new(item), kind))
    }

    /// The hash of this node: the SHA-512Half digest of its prefix serialization, or zero if it is an
    /// empty inner node.
    pub fn hash(&self) -> CryptoHash {
        match self {
            TreeNode::Inner(inner) => inner.hash(),
            TreeNode::Leaf(leaf) => leaf.hash,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, TreeNode::Leaf(_))
    }

    pub fn is_inner(&self) -> bool {
        matches!(self, TreeNode::Inner(_))
    }

    pub fn as_inner(&self) -> Option<&InnerNode> {
        match self {
            TreeNode::Inner(inner) => Some(inner),
            TreeNode::Leaf(_) => None,
        }
    }

    pub(crate) fn as_inner_mut(&mut self) -> Option<&mut InnerNode> {
        match self {
            TreeNode::Inner(inner) => Some(inner),
            TreeNode::Leaf(_) => None,
        }
    }

    pub fn as_leaf(&self) -> Option<&LeafNode> {
        match self {
            TreeNode::Leaf(leaf) => Some(leaf),
            TreeNode::Inner(_) => None,
        }
    }

    /// Whether this node was created or changed since it was last flushed.
    pub fn is_dirty(&self) -> bool {
        match self {
            TreeNode::Inner(inner) => inner.dirty,
            TreeNode::Leaf(leaf) => leaf.dirty,
        }
    }

    pub(crate) fn set_clean(&mut self) {
        match self {
            TreeNode::Inner(inner) => inner.dirty = false,
            TreeNode::Leaf(leaf) => leaf.dirty = false,
        }
    }

    /// Serialize into the prefix format. The SHA-512Half digest of the result is [`hash`](Self::hash).
    pub fn serialize_with_prefix(&self) -> Vec<u8> {
        match self {
            TreeNode::Inner(inner) => {
                let mut bytes = Vec::with_capacity(4 + 16 * 32);
                bytes.extend_from_slice(&HashPrefix::INNER_NODE);
                for branch in inner.branches.iter() {
                    bytes.extend_from_slice(branch.hash().as_bytes());
                }
                bytes
            }
            TreeNode::Leaf(leaf) => {
                let data = leaf.item.data();
                let mut bytes = Vec::with_capacity(4 + data.len() + 32);
                bytes.extend_from_slice(&leaf.prefix());
                bytes.extend_from_slice(data);
                if leaf.kind != LeafKind::TransactionNoMeta {
                    bytes.extend_from_slice(leaf.item.key().as_bytes());
                }
                bytes
            }
        }
    }

    /// Deserialize a node from the prefix format, checking that it hashes to `expected`.
    ///
    /// The children of a deserialized inner node are [unresolved](Branch::Unresolved). The node is clean.
    pub fn from_prefix(bytes: &[u8], expected: &CryptoHash) -> Result<TreeNode, SHAMapError> {
        if bytes.len() < 4 {
            return Err(SHAMapError::InvalidNode {
                reason: "shorter than its prefix",
            });
        }
        let (prefix, body) = bytes.split_at(4);
        let node = if prefix == HashPrefix::INNER_NODE {
            TreeNode::Inner(InnerNode::from_full_hashes(body)?)
        } else if prefix == HashPrefix::LEAF_NODE {
            TreeNode::Leaf(LeafNode::from_data_and_key(body, LeafKind::AccountState)?)
        } else if prefix == HashPrefix::TX_NODE {
            TreeNode::Leaf(LeafNode::from_data_and_key(
                body,
                LeafKind::TransactionWithMeta,
            )?)
        } else if prefix == HashPrefix::TRANSACTION_ID {
            TreeNode::Leaf(LeafNode::from_tx_data(body))
        } else {
            return Err(SHAMapError::InvalidNode {
                reason: "unknown hash prefix",
            });
        };
        node.verify(expected)
    }

    /// Serialize into the wire format.
    pub fn serialize_for_wire(&self) -> Vec<u8> {
        match self {
            TreeNode::Inner(inner) => {
                let mut bytes = Vec::new();
                if inner.branch_count() < COMPRESSION_THRESHOLD {
                    for (branch, child) in inner.branches.iter().enumerate() {
                        if !child.is_empty() {
                            bytes.extend_from_slice(child.hash().as_bytes());
                            bytes.push(branch as u8);
                        }
                    }
                    bytes.push(WIRE_INNER_COMPRESSED);
                } else {
                    for child in inner.branches.iter() {
                        bytes.extend_from_slice(child.hash().as_bytes());
                    }
                    bytes.push(WIRE_INNER_FULL);
                }
                bytes
            }
            TreeNode::Leaf(leaf) => {
                let mut bytes = leaf.item.data().to_vec();
                let tag = match leaf.kind {
                    LeafKind::TransactionNoMeta => WIRE_TX_NO_META,
                    LeafKind::AccountState => WIRE_ACCOUNT_STATE,
                    LeafKind::TransactionWithMeta => WIRE_TX_WITH_META,
                };
                if leaf.kind != LeafKind::TransactionNoMeta {
                    bytes.extend_from_slice(leaf.item.key().as_bytes());
                }
                bytes.push(tag);
                bytes
            }
        }
    }

    /// Deserialize a node from the wire format. The caller is responsible for checking the resulting
    /// node's hash against the hash it expected.
    pub fn from_wire(bytes: &[u8]) -> Result<TreeNode, SHAMapError> {
        let (tag, body) = bytes.split_last().ok_or(SHAMapError::InvalidNode {
            reason: "empty wire node",
        })?;
        match *tag {
            WIRE_TX_NO_META => Ok(TreeNode::Leaf(LeafNode::from_tx_data(body))),
            WIRE_ACCOUNT_STATE => Ok(TreeNode::Leaf(LeafNode::from_data_and_key(
                body,
                LeafKind::AccountState,
            )?)),
            WIRE_TX_WITH_META => Ok(TreeNode::Leaf(LeafNode::from_data_and_key(
                body,
                LeafKind::TransactionWithMeta,
            )?)),
            WIRE_INNER_FULL => Ok(TreeNode::Inner(InnerNode::from_full_hashes(body)?)),
            WIRE_INNER_COMPRESSED => {
                if body.len() % 33 != 0 {
                    return Err(SHAMapError::InvalidNode {
                        reason: "bad compressed inner node length",
                    });
                }
                let mut inner = InnerNode::empty();
                inner.dirty = false;
                for chunk in body.chunks_exact(33) {
                    let branch = chunk[32] as usize;
                    if branch >= 16 || !inner.branches[branch].is_empty() {
                        return Err(SHAMapError::InvalidNode {
                            reason: "bad branch in compressed inner node",
                        });
                    }
                    let hash = CryptoHash::from_slice(&chunk[..32]).ok_or(
                        SHAMapError::InvalidNode {
                            reason: "bad child hash",
                        },
                    )?;
                    if !hash.is_zero() {
                        inner.branches[branch] = Branch::Unresolved(hash);
                    }
                }
                Ok(TreeNode::Inner(inner))
            }
            _ => Err(SHAMapError::InvalidNode {
                reason: "unknown wire type",
            }),
        }
    }

    /// Return `self` if it hashes to `expected`.
    pub(crate) fn verify(self, expected: &CryptoHash) -> Result<TreeNode, SHAMapError> {
        let actual = self.hash();
        if actual == *expected {
            Ok(self)
        } else {
            Err(SHAMapError::HashMismatch {
                expected: *expected,
                actual,
            })
        }
    }
}

/// One of an inner node's 16 child slots.
#[derive(Clone, Debug)]
pub enum Branch {
    Empty,

    /// The child is in memory.
    Resolved(Arc<TreeNode>),

    /// Only the child's hash is known. The node itself has to be fetched from the
    /// [`Family`](super::family::Family) before it can be read.
    Unresolved(CryptoHash),
}

impl Branch {
    pub fn hash(&self) -> CryptoHash {
        match self {
            Branch::Empty => CryptoHash::zero(),
            Branch::Resolved(node) => node.hash(),
            Branch::Unresolved(hash) => *hash,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Branch::Empty)
    }
}

/// An inner node. Its hash is computed lazily and cached until one of its branches changes.
#[derive(Clone, Debug)]
pub struct InnerNode {
    branches: [Branch; 16],
    hash: OnceLock<CryptoHash>,
    dirty: bool,
}

impl InnerNode {
    /// Create an inner node with 16 empty branches.
    pub(crate) fn empty() -> InnerNode {
        InnerNode {
            branches: std::array::from_fn(|_| Branch::Empty),
            hash: OnceLock::new(),
            dirty: true,
        }
    }

    fn from_full_hashes(body: &[u8]) -> Result<InnerNode, SHAMapError> {
        if body.len() != 16 * 32 {
            return Err(SHAMapError::InvalidNode {
                reason: "bad inner node length",
            });
        }
        let mut inner = InnerNode::empty();
        inner.dirty = false;
        for (branch, chunk) in body.chunks_exact(32).enumerate() {
            let hash = CryptoHash::from_slice(chunk).ok_or(SHAMapError::InvalidNode {
                reason: "bad child hash",
            })?;
            if !hash.is_zero() {
                inner.branches[branch] = Branch::Unresolved(hash);
            }
        }
        Ok(inner)
    }

    pub fn hash(&self) -> CryptoHash {
        *self.hash.get_or_init(|| {
            if self.is_empty() {
                return CryptoHash::zero();
            }
            let child_hashes: Vec<CryptoHash> = self.branches.iter().map(Branch::hash).collect();
            let mut parts: Vec<&[u8]> = Vec::with_capacity(17);
            parts.push(&HashPrefix::INNER_NODE[..]);
            for child_hash in child_hashes.iter() {
                parts.push(child_hash.as_bytes());
            }
            sha512_half(&parts)
        })
    }

    pub fn branch(&self, branch: usize) -> &Branch {
        &self.branches[branch]
    }

    pub fn branches(&self) -> &[Branch; 16] {
        &self.branches
    }

    /// Replace the contents of `branch`, invalidating this node's cached hash and marking it dirty.
    pub(crate) fn set_branch(&mut self, branch: usize, child: Branch) {
        self.branches[branch] = child;
        self.hash = OnceLock::new();
        self.dirty = true;
    }

    /// Take the contents of `branch`, leaving it empty. Like [`set_branch`](Self::set_branch), this
    /// invalidates the cached hash.
    pub(crate) fn take_branch(&mut self, branch: usize) -> Branch {
        self.hash = OnceLock::new();
        self.dirty = true;
        std::mem::replace(&mut self.branches[branch], Branch::Empty)
    }

    /// Take the contents of `branch` without touching the cached hash or the dirty flag. The caller must put
    /// back a branch with the same hash using [`restore_branch`](Self::restore_branch).
    pub(crate) fn detach_branch(&mut self, branch: usize) -> Branch {
        std::mem::replace(&mut self.branches[branch], Branch::Empty)
    }

    /// Put `child` into `branch`, which must previously have held a branch with the same hash. Used to
    /// replace an unresolved branch with the node it refers to.
    pub(crate) fn restore_branch(&mut self, branch: usize, child: Branch) {
        self.branches[branch] = child;
    }

    /// Get mutable references to every in-memory child. Callers must not change the content of the
    /// children.
    pub(crate) fn resolved_children_mut(&mut self) -> impl Iterator<Item = &mut Arc<TreeNode>> {
        self.branches.iter_mut().filter_map(|branch| match branch {
            Branch::Resolved(child) => Some(child),
            _ => None,
        })
    }

    pub fn branch_count(&self) -> usize {
        self.branches.iter().filter(|b| !b.is_empty()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.iter().all(Branch::is_empty)
    }

    /// If exactly one branch is occupied, get its index.
    pub fn single_branch(&self) -> Option<usize> {
        let mut occupied = self
            .branches
            .iter()
            .enumerate()
            .filter(|(_, b)| !b.is_empty())
            .map(|(i, _)| i);
        match (occupied.next(), occupied.next()) {
            (Some(only), None) => Some(only),
            _ => None,
        }
    }
}

/// A leaf node holding a single [`SHAMapItem`].
#[derive(Clone, Debug)]
pub struct LeafNode {
    item: Arc<SHAMapItem>,
    kind: LeafKind,
    hash: CryptoHash,
    dirty: bool,
}

impl LeafNode {
    pub(crate) fn new(item: Arc<SHAMapItem>, kind: LeafKind) -> LeafNode {
        let hash = Self::compute_hash(&item, kind);
        LeafNode {
            item,
            kind,
            hash,
            dirty: true,
        }
    }

    /// Like [`new`](Self::new), but rejects a transaction without metadata whose key is not the hash of
    /// its data. Such a leaf would come back under a different key once reloaded from its serialization.
    pub(crate) fn checked(item: Arc<SHAMapItem>, kind: LeafKind) -> Result<LeafNode, SHAMapError> {
        if kind == LeafKind::TransactionNoMeta && *item.key() != transaction_id(item.data()) {
            return Err(SHAMapError::InvalidNode {
                reason: "transaction key is not the transaction id",
            });
        }
        Ok(LeafNode::new(item, kind))
    }

    fn from_data_and_key(body: &[u8], kind: LeafKind) -> Result<LeafNode, SHAMapError> {
        if body.len() < 32 {
            return Err(SHAMapError::InvalidNode {
                reason: "leaf shorter than its key",
            });
        }
        let (data, key) = body.split_at(body.len() - 32);
        let key = CryptoHash::from_slice(key).ok_or(SHAMapError::InvalidNode {
            reason: "bad leaf key",
        })?;
        let mut leaf = LeafNode::new(Arc::new(SHAMapItem::new(key, data.to_vec())), kind);
        leaf.dirty = false;
        Ok(leaf)
    }

    /// A transaction without metadata is keyed by its own hash.
    fn from_tx_data(data: &[u8]) -> LeafNode {
        let key = transaction_id(data);
        let mut leaf = LeafNode::new(
            Arc::new(SHAMapItem::new(key, data.to_vec())),
            LeafKind::TransactionNoMeta,
        );
        leaf.dirty = false;
        leaf
    }

    fn compute_hash(item: &SHAMapItem, kind: LeafKind) -> CryptoHash {
        match kind {
            LeafKind::TransactionNoMeta => {
                sha512_half(&[&HashPrefix::TRANSACTION_ID[..], item.data()])
            }
            LeafKind::TransactionWithMeta => {
                sha512_half(&[&HashPrefix::TX_NODE[..], item.data(), item.key().as_bytes()])
            }
            LeafKind::AccountState => {
                sha512_half(&[&HashPrefix::LEAF_NODE[..], item.data(), item.key().as_bytes()])
            }
        }
    }

    fn prefix(&self) -> [u8; 4] {
        match self.kind {
            LeafKind::TransactionNoMeta => HashPrefix::TRANSACTION_ID,
            LeafKind::TransactionWithMeta => HashPrefix::TX_NODE,
            LeafKind::AccountState => HashPrefix::LEAF_NODE,
        }
    }

    pub fn item(&self) -> &Arc<SHAMapItem> {
        &self.item
    }

    pub fn key(&self) -> &CryptoHash {
        self.item.key()
    }

    pub fn kind(&self) -> LeafKind {
        self.kind
    }
}
