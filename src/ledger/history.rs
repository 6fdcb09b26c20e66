/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! In-memory index of recently closed ledgers.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, PoisonError, RwLock},
};

use crate::{
    node_store::NodeStore,
    types::data_types::{CryptoHash, LedgerSeq},
};

use super::implementation::Ledger;

/// Closed ledgers the node has built or acquired, indexed by hash, plus the chain of validated ledgers
/// indexed by sequence number.
pub struct LedgerHistory<S: NodeStore> {
    by_hash: HashMap<CryptoHash, Arc<Ledger<S>>>,
    validated_by_seq: BTreeMap<LedgerSeq, CryptoHash>,
    validated: Option<Arc<Ledger<S>>>,
    last_closed: Option<Arc<Ledger<S>>>,
}

impl<S: NodeStore> LedgerHistory<S> {
    pub fn new() -> Self {
        Self {
            by_hash: HashMap::new(),
            validated_by_seq: BTreeMap::new(),
            validated: None,
            last_closed: None,
        }
    }

    /// Add a closed ledger. Returns `false` if a ledger with the same hash is already known.
    pub fn insert(&mut self, ledger: Arc<Ledger<S>>) -> bool {
        let hash = ledger.hash();
        if self.by_hash.contains_key(&hash) {
            return false;
        }
        self.by_hash.insert(hash, ledger);
        true
    }

    pub fn get(&self, hash: &CryptoHash) -> Option<Arc<Ledger<S>>> {
        self.by_hash.get(hash).cloned()
    }

    pub fn contains(&self, hash: &CryptoHash) -> bool {
        self.by_hash.contains_key(hash)
    }

    /// Get the validated ledger with sequence number `seq`.
    pub fn get_validated_by_seq(&self, seq: LedgerSeq) -> Option<Arc<Ledger<S>>> {
        self.validated_by_seq
            .get(&seq)
            .and_then(|hash| self.get(hash))
    }

    /// The ledger the node last built or switched to, which the current round builds on.
    pub fn last_closed(&self) -> Option<&Arc<Ledger<S>>> {
        self.last_closed.as_ref()
    }

    /// Record `ledger` as the last closed ledger, adding it to the history if it is new.
    pub fn set_last_closed(&mut self, ledger: Arc<Ledger<S>>) {
        self.insert(ledger.clone());
        self.last_closed = Some(ledger);
    }

    /// The newest validated ledger.
    pub fn validated(&self) -> Option<&Arc<Ledger<S>>> {
        self.validated.as_ref()
    }

    /// Mark the ledger with `hash` as validated, along with every known ancestor of it. Returns the
    /// hashes that were newly marked, oldest first. A ledger that is not newer than the current validated
    /// ledger is ignored.
    pub fn set_validated(&mut self, hash: &CryptoHash) -> Vec<CryptoHash> {
        let ledger = match self.get(hash) {
            Some(ledger) => ledger,
            None => return Vec::new(),
        };
        if let Some(current) = &self.validated {
            if ledger.seq() <= current.seq() {
                return Vec::new();
            }
        }

        let mut newly_validated = Vec::new();
        let mut cursor = Some(ledger.clone());
        while let Some(ledger) = cursor {
            if self.validated_by_seq.get(&ledger.seq()) == Some(&ledger.hash()) {
                break;
            }
            self.validated_by_seq.insert(ledger.seq(), ledger.hash());
            newly_validated.push(ledger.hash());
            cursor = self.get(&ledger.parent_hash());
        }
        newly_validated.reverse();
        self.validated = Some(ledger);
        newly_validated
    }

    /// Whether `ancestor` is `descendant` or one of its known ancestors.
    pub fn is_ancestor(&self, ancestor: &CryptoHash, descendant: &CryptoHash) -> bool {
        let mut cursor = self.get(descendant);
        while let Some(ledger) = cursor {
            if ledger.hash() == *ancestor {
                return true;
            }
            cursor = self.get(&ledger.parent_hash());
        }
        false
    }

    /// Forget every ledger more than `keep` sequence numbers older than the newest validated ledger.
    /// Returns the number of ledgers forgotten.
    pub fn prune(&mut self, keep: u32) -> usize {
        let newest = match &self.validated {
            Some(validated) => validated.seq(),
            None => return 0,
        };
        let cutoff = LedgerSeq::new(newest.int().saturating_sub(keep));
        let before = self.by_hash.len();
        let last_closed = self.last_closed.as_ref().map(|ledger| ledger.hash());
        self.by_hash
            .retain(|hash, ledger| ledger.seq() >= cutoff || Some(*hash) == last_closed);
        self.validated_by_seq = self.validated_by_seq.split_off(&cutoff);
        before - self.by_hash.len()
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }
}

impl<S: NodeStore> Default for LedgerHistory<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// A shared, read-only handle to the [`LedgerHistory`] kept by the algorithm thread.
///
/// Readers never hold the lock for longer than a single call.
pub struct LedgerHistoryCamera<S: NodeStore>(Arc<RwLock<LedgerHistory<S>>>);

impl<S: NodeStore> LedgerHistoryCamera<S> {
    pub(crate) fn new(history: Arc<RwLock<LedgerHistory<S>>>) -> Self {
        LedgerHistoryCamera(history)
    }

    pub fn get(&self, hash: &CryptoHash) -> Option<Arc<Ledger<S>>> {
        self.read(|history| history.get(hash))
    }

    pub fn get_validated_by_seq(&self, seq: LedgerSeq) -> Option<Arc<Ledger<S>>> {
        self.read(|history| history.get_validated_by_seq(seq))
    }

    pub fn validated(&self) -> Option<Arc<Ledger<S>>> {
        self.read(|history| history.validated().cloned())
    }

    pub fn last_closed(&self) -> Option<Arc<Ledger<S>>> {
        self.read(|history| history.last_closed().cloned())
    }

    pub fn len(&self) -> usize {
        self.read(|history| history.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read<T>(&self, f: impl FnOnce(&LedgerHistory<S>) -> T) -> T {
        f(&self.0.read().unwrap_or_else(PoisonError::into_inner))
    }
}

impl<S: NodeStore> Clone for LedgerHistoryCamera<S> {
    fn clone(&self) -> Self {
        LedgerHistoryCamera(self.0.clone())
    }
}
