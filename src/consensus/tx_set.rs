/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Candidate transaction sets.

use std::{collections::BTreeMap, sync::Arc};

use crate::{
    node_store::NodeStore,
    shamap::{Family, LeafKind, SHAMap, SHAMapError, SHAMapItem, SHAMapType},
    types::{crypto_primitives::transaction_id, data_types::CryptoHash},
};

/// A set of transactions that a position proposes to apply to the previous ledger, stored as a
/// transaction SHAMap whose leaves are transactions without metadata. The set's id is the map's root
/// hash, so two validators with the same transactions always have sets with the same id.
pub struct TxSet<S: NodeStore> {
    map: SHAMap<S>,
}

impl<S: NodeStore> TxSet<S> {
    /// Create an empty, modifiable set.
    pub fn new(family: Arc<Family<S>>) -> TxSet<S> {
        TxSet {
            map: SHAMap::new(family, SHAMapType::Transaction),
        }
    }

    /// Create a set from serialized transactions. Duplicates are ignored.
    pub fn from_transactions(
        family: Arc<Family<S>>,
        transactions: impl IntoIterator<Item = Vec<u8>>,
    ) -> Result<TxSet<S>, SHAMapError> {
        let mut set = TxSet::new(family);
        for tx in transactions {
            set.insert(tx)?;
        }
        Ok(set)
    }

    /// Wrap an existing transaction map, for example one acquired from peers.
    pub fn from_map(map: SHAMap<S>) -> TxSet<S> {
        TxSet { map }
    }

    pub fn id(&self) -> CryptoHash {
        self.map.hash()
    }

    pub fn map(&self) -> &SHAMap<S> {
        &self.map
    }

    /// Create a modifiable copy that shares every node with `self`.
    pub fn to_mutable(&self) -> TxSet<S> {
        TxSet {
            map: self.map.snapshot(true),
        }
    }

    /// Forbid further changes.
    pub fn freeze(&mut self) {
        self.map.set_immutable();
    }

    pub fn exists(&self, txid: &CryptoHash) -> Result<bool, SHAMapError> {
        self.map.has_item(txid)
    }

    /// Get the serialized transaction with id `txid`.
    pub fn find(&self, txid: &CryptoHash) -> Result<Option<Vec<u8>>, SHAMapError> {
        Ok(self.map.fetch(txid)?.map(|item| item.data().to_vec()))
    }

    /// Add a serialized transaction. Returns `false` if it is already in the set.
    pub fn insert(&mut self, tx: Vec<u8>) -> Result<bool, SHAMapError> {
        let txid = transaction_id(&tx);
        self.map
            .insert(SHAMapItem::new(txid, tx), LeafKind::TransactionNoMeta)
    }

    /// Remove a transaction. Returns `false` if it was not in the set.
    pub fn erase(&mut self, txid: &CryptoHash) -> Result<bool, SHAMapError> {
        self.map.erase(txid)
    }

    /// Every transaction in the set, in id order.
    pub fn transactions(&self) -> Result<Vec<(CryptoHash, Vec<u8>)>, SHAMapError> {
        Ok(self
            .map
            .items()?
            .into_iter()
            .map(|item| (*item.key(), item.data().to_vec()))
            .collect())
    }

    pub fn len(&self) -> Result<usize, SHAMapError> {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Find the transactions that are in exactly one of `self` and `other`. Maps each such transaction's
    /// id to `true` if it is in `self`, or `false` if it is in `other`, along with the serialized
    /// transaction.
    pub fn compare(
        &self,
        other: &TxSet<S>,
    ) -> Result<BTreeMap<CryptoHash, (bool, Vec<u8>)>, SHAMapError> {
        let delta = self.map.compare(&other.map, usize::MAX)?;
        let mut differences = BTreeMap::new();
        for (txid, item) in delta.items {
            match (item.ours, item.theirs) {
                (Some(ours), None) => {
                    differences.insert(txid, (true, ours.data().to_vec()));
                }
                (None, Some(theirs)) => {
                    differences.insert(txid, (false, theirs.data().to_vec()));
                }
                // Same id with different contents cannot happen in a transaction set, whose keys are the
                // hashes of the contents.
                _ => (),
            }
        }
        Ok(differences)
    }
}

impl<S: NodeStore> Clone for TxSet<S> {
    fn clone(&self) -> Self {
        TxSet {
            map: self.map.snapshot(!self.map.is_immutable()),
        }
    }
}
