/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Positions of nodes within a SHAMap.

use std::fmt::{self, Display, Formatter};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::data_types::CryptoHash;

/// Maximum depth of a SHAMap: one level per nibble of a 256-bit key.
pub const MAX_DEPTH: u8 = 64;

/// Identifies the position of a node in a SHAMap by its depth and the key prefix leading to it.
///
/// `id` is a key with every nibble at or below `depth` zeroed, so two node ids are equal exactly when they
/// name the same position. The root is `{ depth: 0, id: 0 }`.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize,
)]
pub struct SHAMapNodeId {
    depth: u8,
    id: CryptoHash,
}

impl SHAMapNodeId {
    pub fn root() -> Self {
        Self {
            depth: 0,
            id: CryptoHash::zero(),
        }
    }

    /// The id of the node at `depth` on the path to `key`.
    pub fn for_key(key: &CryptoHash, depth: u8) -> Self {
        let mut bytes = key.bytes();
        let depth = depth.min(MAX_DEPTH);
        for nibble in depth..MAX_DEPTH {
            let byte = &mut bytes[(nibble / 2) as usize];
            if nibble % 2 == 0 {
                *byte &= 0x0F;
            } else {
                *byte &= 0xF0;
            }
        }
        Self {
            depth,
            id: CryptoHash::new(bytes),
        }
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn id(&self) -> &CryptoHash {
        &self.id
    }

    pub fn is_root(&self) -> bool {
        self.depth == 0
    }

    /// Which of this node's 16 branches leads towards `key`.
    pub fn select_branch(&self, key: &CryptoHash) -> usize {
        key.nibble(self.depth) as usize
    }

    /// The id of this node's child in `branch`.
    ///
    /// # Panics
    ///
    /// Panics if this node is at [`MAX_DEPTH`] or `branch >= 16`.
    pub fn child(&self, branch: usize) -> Self {
        assert!(self.depth < MAX_DEPTH && branch < 16);
        let mut bytes = self.id.bytes();
        let byte = &mut bytes[(self.depth / 2) as usize];
        if self.depth % 2 == 0 {
            *byte = (*byte & 0x0F) | ((branch as u8) << 4);
        } else {
            *byte = (*byte & 0xF0) | branch as u8;
        }
        Self {
            depth: self.depth + 1,
            id: CryptoHash::new(bytes),
        }
    }
}

impl Display for SHAMapNodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "NodeID({},{})", self.depth, self.id)
    }
}
