/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Views over ledger state that buffer changes before they reach a ledger.
//!
//! - [`Sandbox`]: a read-and-writable view over a ledger's account state in which a single transaction
//!   is applied. Its changes are either applied to the ledger all at once or discarded.
//! - [`OpenView`]: the transactions that have been submitted since the last closed ledger, from which
//!   the local node's initial position in the next consensus round is taken.

use std::{collections::BTreeMap, sync::Arc};

use crate::{
    node_store::NodeStore,
    types::{crypto_primitives::transaction_id, data_types::CryptoHash},
};

use super::implementation::{Ledger, LedgerError};

/// A buffered change to one account state entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Change {
    Put(Vec<u8>),
    Erase,
}

/// Read and write access to account state, as given to a
/// [`TransactionProcessor`](super::build::TransactionProcessor).
pub trait StateView {
    fn read(&self, key: &CryptoHash) -> Result<Option<Vec<u8>>, LedgerError>;

    fn put(&mut self, key: CryptoHash, data: Vec<u8>);

    fn erase(&mut self, key: CryptoHash);
}

/// Buffers the changes of one transaction on top of a ledger's account state.
pub struct Sandbox<'a, S: NodeStore> {
    base: &'a Ledger<S>,
    changes: BTreeMap<CryptoHash, Change>,
}

impl<'a, S: NodeStore> Sandbox<'a, S> {
    pub fn new(base: &'a Ledger<S>) -> Self {
        Self {
            base,
            changes: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Consume the sandbox, returning its changes in key order.
    pub fn into_changes(self) -> BTreeMap<CryptoHash, Change> {
        self.changes
    }
}

impl<'a, S: NodeStore> StateView for Sandbox<'a, S> {
    fn read(&self, key: &CryptoHash) -> Result<Option<Vec<u8>>, LedgerError> {
        match self.changes.get(key) {
            Some(Change::Put(data)) => Ok(Some(data.clone())),
            Some(Change::Erase) => Ok(None),
            None => Ok(self.base.read(key)?.map(|item| item.data().to_vec())),
        }
    }

    fn put(&mut self, key: CryptoHash, data: Vec<u8>) {
        self.changes.insert(key, Change::Put(data));
    }

    fn erase(&mut self, key: CryptoHash) {
        self.changes.insert(key, Change::Erase);
    }
}

/// Transactions submitted on top of the last closed ledger that have not been included in a ledger yet.
pub struct OpenView<S: NodeStore> {
    parent: Arc<Ledger<S>>,
    pending: BTreeMap<CryptoHash, Vec<u8>>,
}

impl<S: NodeStore> OpenView<S> {
    pub fn new(parent: Arc<Ledger<S>>) -> Self {
        Self {
            parent,
            pending: BTreeMap::new(),
        }
    }

    /// The closed ledger the pending transactions will be applied on top of.
    pub fn parent(&self) -> &Arc<Ledger<S>> {
        &self.parent
    }

    /// Add a transaction. Returns its id, or `None` if it is already pending.
    pub fn submit(&mut self, tx: Vec<u8>) -> Option<CryptoHash> {
        let txid = transaction_id(&tx);
        if self.pending.contains_key(&txid) {
            return None;
        }
        self.pending.insert(txid, tx);
        Some(txid)
    }

    pub fn contains(&self, txid: &CryptoHash) -> bool {
        self.pending.contains_key(txid)
    }

    /// Drop a pending transaction, returning it if it was pending.
    pub fn remove(&mut self, txid: &CryptoHash) -> Option<Vec<u8>> {
        self.pending.remove(txid)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Pending transactions in id order.
    pub fn transactions(&self) -> impl Iterator<Item = (&CryptoHash, &Vec<u8>)> {
        self.pending.iter()
    }

    /// Move the view on top of a newly closed ledger, dropping every pending transaction that the new
    /// ledger includes. Transactions that were not included stay pending for the next round.
    pub fn advance(&mut self, new_parent: Arc<Ledger<S>>) -> Result<(), LedgerError> {
        let mut included = Vec::new();
        for txid in self.pending.keys() {
            if new_parent.tx_map().has_item(txid)? {
                included.push(*txid);
            }
        }
        for txid in included {
            self.pending.remove(&txid);
        }
        self.parent = new_parent;
        Ok(())
    }
}
