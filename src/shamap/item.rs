/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Items stored in SHAMap leaves.

use crate::types::data_types::CryptoHash;

/// A key and an opaque serialized value. The unit of content of a SHAMap.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SHAMapItem {
    key: CryptoHash,
    data: Vec<u8>,
}

impl SHAMapItem {
    pub fn new(key: CryptoHash, data: Vec<u8>) -> Self {
        Self { key, data }
    }

    pub fn key(&self) -> &CryptoHash {
        &self.key
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// What a leaf holds. Determines how the leaf is hashed and serialized.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LeafKind {
    /// A transaction without metadata, as found in a consensus transaction set. The key is the
    /// transaction id, which is the hash of the leaf.
    TransactionNoMeta,

    /// A transaction with its metadata, as found in a closed ledger's transaction map.
    TransactionWithMeta,

    /// An account state entry.
    AccountState,
}
